use super::*;

#[test]
fn test_lifetime_add_to_and_get_from() -> Result<()> {
    let mut m = Message::new();
    let l = Lifetime(Duration::from_secs(1800));
    m.build(&[Box::new(l)])?;

    let mut decoded = Message::new();
    decoded.raw = m.raw.clone();
    decoded.decode()?;

    let mut got = Lifetime::default();
    got.get_from(&decoded)?;
    assert_eq!(got, l);

    Ok(())
}

#[test]
fn test_lifetime_default() {
    assert_eq!(Lifetime::default().0, DEFAULT_LIFETIME);
}
