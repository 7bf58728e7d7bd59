use super::*;

#[test]
fn test_relayed_address_add_to_and_get_from() -> Result<()> {
    let mut m = Message::new();
    let a = RelayedAddress {
        ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)),
        port: 3478,
    };
    m.build(&[Box::new(a)])?;

    let mut decoded = Message::new();
    decoded.raw = m.raw.clone();
    decoded.decode()?;

    let mut got = RelayedAddress::default();
    got.get_from(&decoded)?;
    assert_eq!(got, a);

    Ok(())
}
