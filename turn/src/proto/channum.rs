
use stun::attributes::ATTR_CHANNEL_NUMBER;
use stun::checks::*;
use stun::message::*;

const CHANNEL_NUMBER_SIZE: usize = 4;

/// Inclusive range of channel numbers usable for CHANNEL-BIND, as required by the
/// CHANNEL-NUMBER attribute.
///
/// RFC 5766 Section 11
pub const MIN_CHANNEL_NUMBER: u16 = 0x4000;
pub const MAX_CHANNEL_NUMBER: u16 = 0x7FFF;

/// `ChannelNumber` represents the CHANNEL-NUMBER attribute.
///
/// RFC 5766 Section 14.1
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct ChannelNumber(pub u16);

impl Setter for ChannelNumber {
    /// Adds CHANNEL-NUMBER to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = vec![0; CHANNEL_NUMBER_SIZE];
        v[0..2].copy_from_slice(&self.0.to_be_bytes());
        // v[2..4] are reserved and must be zero.
        m.add(ATTR_CHANNEL_NUMBER, &v);
        Ok(())
    }
}

impl Getter for ChannelNumber {
    /// Decodes CHANNEL-NUMBER from message.
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_CHANNEL_NUMBER)?;
        check_size(ATTR_CHANNEL_NUMBER, v.len(), CHANNEL_NUMBER_SIZE)?;
        self.0 = u16::from_be_bytes([v[0], v[1]]);
        Ok(())
    }
}
