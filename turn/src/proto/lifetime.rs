#[cfg(test)]
mod lifetime_test;

use std::time::Duration;

use stun::attributes::ATTR_LIFETIME;
use stun::checks::*;
use stun::message::*;

const LIFETIME_SIZE: usize = 4;

/// Default lifetime granted by a TURN server when a request's LIFETIME attribute
/// does not ask for a shorter one.
///
/// RFC 5766 Section 2.2
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(600);

/// `Lifetime` represents the LIFETIME attribute, encoded as whole seconds.
///
/// RFC 5766 Section 14.2
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Lifetime(pub Duration);

impl Default for Lifetime {
    fn default() -> Self {
        Lifetime(DEFAULT_LIFETIME)
    }
}

impl Setter for Lifetime {
    /// Adds LIFETIME to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let secs = self.0.as_secs().min(u32::MAX as u64) as u32;
        m.add(ATTR_LIFETIME, &secs.to_be_bytes());
        Ok(())
    }
}

impl Getter for Lifetime {
    /// Decodes LIFETIME from message.
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_LIFETIME)?;
        check_size(ATTR_LIFETIME, v.len(), LIFETIME_SIZE)?;
        let secs = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
        self.0 = Duration::from_secs(secs as u64);
        Ok(())
    }
}
