// Legacy handshake used by some TURN deployments that speak "Google SSLTCP": a fake TLS
// exchange performed once, immediately after the TCP connection opens and before any
// STUN/TURN traffic, so that middleboxes which only forward traffic they recognize as TLS
// let the connection through. The byte sequences are fixed by interop requirements and must
// be reproduced verbatim; they do not constitute a real TLS handshake.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// The 78-byte SSLv2 ClientHello sent by the client to open the fake handshake.
pub const CLIENT_HELLO: [u8; 78] = [
    0x80, 0x4c, 0x01, 0x03, 0x01, 0x00, 0x31, 0x00, 0x00, 0x00, 0x10, 0x01, 0x00, 0x80, 0x03, 0x00,
    0x80, 0x07, 0x00, 0xc0, 0x06, 0x00, 0x40, 0x02, 0x00, 0x80, 0x04, 0x00, 0x80, 0x00, 0x00, 0x04,
    0x00, 0xfe, 0xff, 0x00, 0x00, 0x0a, 0x00, 0xfe, 0xfe, 0x00, 0x00, 0x09, 0x00, 0x00, 0x64, 0x00,
    0x00, 0x62, 0x00, 0x00, 0x03, 0x00, 0x00, 0x06, 0x1f, 0x17, 0x0c, 0xa6, 0x2f, 0x00, 0x78, 0xfc,
    0x46, 0x55, 0x2e, 0xb1, 0x83, 0x39, 0xf1, 0xea, 0x5c, 0x72, 0x88, 0x30, 0x60, 0x3f,
];

/// The 79-byte TLS 1.0 ServerHello the peer must reply with before any STUN/TURN bytes flow.
pub const SERVER_HELLO: [u8; 79] = [
    0x16, 0x03, 0x01, 0x00, 0x4a, 0x02, 0x00, 0x00, 0x46, 0x03, 0x01, 0x42, 0x85, 0x45, 0xa7, 0x27,
    0xa9, 0x5d, 0xa0, 0xb3, 0xc5, 0xe7, 0x53, 0xda, 0x48, 0x2b, 0x3f, 0xc6, 0x5a, 0xca, 0x89, 0xc1,
    0x58, 0x52, 0xa1, 0x19, 0x1c, 0x20, 0x67, 0x28, 0xb5, 0x00, 0x20, 0x9c, 0xdc, 0x69, 0x16, 0x6d,
    0xe6, 0x0e, 0x2a, 0x56, 0xc3, 0x24, 0xcd, 0xfa, 0x39, 0x54, 0xf4, 0xca, 0x7a, 0xe1, 0xfc, 0xbe,
    0x90, 0x05, 0xcd, 0x48, 0x00, 0x04, 0x00, 0x05, 0x00, 0xff, 0x01, 0x00, 0x00, 0x05, 0x00, 0x0f,
    0x00, 0x01, 0x01, 0x00,
];

/// Performs the client side of the handshake: write the fixed ClientHello, then read and verify
/// the fixed ServerHello. Used before any STUN/TURN bytes are sent on a freshly opened TCP
/// connection to a TURN server advertised with the legacy `google-turn-ssltcp` scheme.
pub async fn client_handshake<S>(stream: &mut S) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream.write_all(&CLIENT_HELLO).await?;

    let mut reply = [0u8; SERVER_HELLO.len()];
    stream.read_exact(&mut reply).await?;

    if reply != SERVER_HELLO {
        return Err(Error::ErrGoogleSslTcpHandshakeMismatch);
    }

    Ok(())
}
