
use stun::attributes::ATTR_DATA;
use stun::message::*;

/// `Data` represents the DATA attribute.
///
/// RFC 5766 Section 14.4
#[derive(Default, PartialEq, Eq, Debug, Clone)]
pub struct Data(pub Vec<u8>);

impl Setter for Data {
    /// Adds DATA to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_DATA, &self.0);
        Ok(())
    }
}

impl Getter for Data {
    /// Decodes DATA from message.
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.0 = m.get(ATTR_DATA)?;
        Ok(())
    }
}
