//! Opaque, sortable identifiers for every stable entity in the data model.
//!
//! Composed of a 128-bit process identifier (boot time || random) and a
//! 64-bit monotonic sequence number, so ids are unique across a process's
//! lifetime without needing coordination with any other process.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use rand::RngCore;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Debug, Default)]
pub struct Ident(pub [u8; 24]);

struct Generator {
    pid: u128,
    sn: AtomicU64,
}

impl Generator {
    fn new() -> Self {
        let time = chrono::Utc::now().timestamp_millis() as u128;
        let rand = rand::thread_rng().next_u64() as u128;
        Self {
            pid: (time << 64) | rand,
            sn: AtomicU64::new(0),
        }
    }

    fn gen(&self) -> Ident {
        let sn = self.sn.fetch_add(1, Ordering::Relaxed);
        let mut res = [0u8; 24];
        res[0..16].copy_from_slice(&u128::to_be_bytes(self.pid));
        res[16..24].copy_from_slice(&u64::to_be_bytes(sn));
        Ident(res)
    }
}

fn generator() -> &'static Generator {
    static GEN: OnceLock<Generator> = OnceLock::new();
    GEN.get_or_init(Generator::new)
}

pub fn gen_ident() -> Ident {
    generator().gen()
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for Ident {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Ident, &'static str> {
        if s.len() != 48 {
            return Err("bad length");
        }
        let mut tmp = [0u8; 24];
        for (i, byte) in tmp.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| "invalid hex")?;
        }
        Ok(Ident(tmp))
    }
}

impl Serialize for Ident {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ident {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = String::deserialize(d)?;
        Ident::from_str(&v).map_err(DeError::custom)
    }
}

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
        pub struct $name(pub Ident);

        impl $name {
            pub fn gen() -> Self {
                Self(gen_ident())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

opaque_id!(UserId);
opaque_id!(MailboxId);
opaque_id!(MessageId);
opaque_id!(JournalId);
opaque_id!(BlobId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_roundtrip() {
        let a = gen_ident();
        let b = gen_ident();
        assert_ne!(a, b);
        let s = a.to_string();
        assert_eq!(s.parse::<Ident>().unwrap(), a);
    }

    #[test]
    fn opaque_ids_compare_by_generation_order() {
        let a = MessageId::gen();
        let b = MessageId::gen();
        assert!(a < b);
    }
}
