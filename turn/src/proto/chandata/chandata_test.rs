use super::*;

#[test]
fn test_channel_data_encode_decode_roundtrip() -> Result<()> {
    let mut cd = ChannelData {
        data: b"hello".to_vec(),
        number: ChannelNumber(0x4000),
        ..Default::default()
    };
    cd.encode();

    let mut decoded = ChannelData {
        raw: cd.raw.clone(),
        ..Default::default()
    };
    decoded.decode()?;

    assert_eq!(decoded.number, cd.number);
    assert_eq!(decoded.data, cd.data);

    Ok(())
}

#[test]
fn test_is_channel_data() {
    let mut cd = ChannelData {
        data: b"hi".to_vec(),
        number: ChannelNumber(0x4001),
        ..Default::default()
    };
    cd.encode();
    assert!(ChannelData::is_channel_data(&cd.raw));
    assert!(!ChannelData::is_channel_data(&[0, 1]));
}

#[test]
fn test_channel_data_decode_rejects_bad_channel_number() {
    let mut cd = ChannelData {
        raw: vec![0x00, 0x01, 0x00, 0x00],
        ..Default::default()
    };
    assert!(cd.decode().is_err());
}
