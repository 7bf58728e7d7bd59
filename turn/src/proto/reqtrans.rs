
use stun::attributes::ATTR_REQUESTED_TRANSPORT;
use stun::checks::*;
use stun::message::*;

/// Protocol number reserved for UDP, as used by the REQUESTED-TRANSPORT attribute.
///
/// RFC 5766 Section 14.7
pub const PROTO_UDP: u8 = 17;

const REQUESTED_TRANSPORT_SIZE: usize = 4;

/// `RequestedTransport` represents the REQUESTED-TRANSPORT attribute.
///
/// RFC 5766 Section 14.7
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct RequestedTransport {
    pub protocol: u8,
}

impl Setter for RequestedTransport {
    /// Adds REQUESTED-TRANSPORT to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = vec![0; REQUESTED_TRANSPORT_SIZE];
        v[0] = self.protocol;
        // v[1..4] are reserved and must be zero.
        m.add(ATTR_REQUESTED_TRANSPORT, &v);
        Ok(())
    }
}

impl Getter for RequestedTransport {
    /// Decodes REQUESTED-TRANSPORT from message.
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_REQUESTED_TRANSPORT)?;
        check_size(ATTR_REQUESTED_TRANSPORT, v.len(), REQUESTED_TRANSPORT_SIZE)?;
        self.protocol = v[0];
        Ok(())
    }
}
