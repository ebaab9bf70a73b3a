//! Capability advertisement (§1, §4.5). Kept as a flat, server-wide static
//! list rather than a per-session computed one, since nothing this server
//! does ever removes a capability mid-connection — ENABLE only ever turns
//! an already-advertised extension's behavior on.

pub const CAPABILITIES: &[&str] = &[
    "IMAP4rev1",
    "CONDSTORE",
    "UIDPLUS",
    "MOVE",
    "QUOTA",
    "LIST-SPECIAL-USE",
    "LITERAL+",
    "ID",
    "NAMESPACE",
    "IDLE",
    "UNSELECT",
    "ENABLE",
];

#[derive(Clone, Debug, Default)]
pub struct ServerCapability;

impl ServerCapability {
    pub fn to_line(&self) -> String {
        format!("* CAPABILITY {}", CAPABILITIES.join(" "))
    }
}

/// What the client has turned on via ENABLE. RFC 7162 CONDSTORE is
/// "enabled" either explicitly or implicitly (any CONDSTORE-flavored
/// command SELECTs it in), which is why `enable_condstore` is a plain
/// setter reachable from more than one command handler.
#[derive(Clone, Debug, Default)]
pub struct ClientCapability {
    pub condstore: bool,
    pub qresync: bool,
}

impl ClientCapability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, name: &str) -> bool {
        match name.to_ascii_uppercase().as_str() {
            "CONDSTORE" => {
                self.condstore = true;
                true
            }
            "QRESYNC" => {
                self.condstore = true;
                self.qresync = true;
                true
            }
            _ => false,
        }
    }
}
