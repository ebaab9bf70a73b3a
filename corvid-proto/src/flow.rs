//! Session state machine (§4.4, §4.5): the four states RFC 3501 defines
//! (Not Authenticated, Authenticated, Selected, Logout) and the legal
//! transitions between them.

use anyhow::{bail, Result};
use corvid_mail::SessionState;
use corvid_store::login::AuthenticatedUser;

pub enum State {
    NotAuthenticated,
    Authenticated(AuthenticatedUser),
    Selected(AuthenticatedUser, Box<SessionState>),
    Logout,
}

pub enum Transition {
    None,
    Authenticate(AuthenticatedUser),
    Select(Box<SessionState>),
    Unselect,
    Logout,
}

impl State {
    pub fn apply(&mut self, tr: Transition) -> Result<()> {
        *self = match (std::mem::replace(self, State::Logout), tr) {
            (s, Transition::None) => s,
            (State::NotAuthenticated, Transition::Authenticate(u)) => State::Authenticated(u),
            (State::Authenticated(u), Transition::Select(mbx)) => State::Selected(u, mbx),
            (State::Selected(u, _), Transition::Select(mbx)) => State::Selected(u, mbx),
            (State::Selected(u, _), Transition::Unselect) => State::Authenticated(u),
            (_, Transition::Logout) => State::Logout,
            (_, _) => bail!("illegal state transition from current state"),
        };
        Ok(())
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        match self {
            State::Authenticated(u) | State::Selected(u, _) => Some(u),
            _ => None,
        }
    }
}
