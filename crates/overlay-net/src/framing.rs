//! Wire framing for the peer handshake, plus a peripheral codec used by
//! CLI-style external collaborators.
//!
//! Two framings coexist: the raw opening token (no length prefix) and
//! newline-terminated canonical JSON for the three structured frames.

use overlay_core::{Address, Signature};
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The opening challenge token. Read and written as raw bytes, no framing.
pub const FRAME0_TOKEN: &[u8] = b"get_nonce";

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stream closed before a frame was read")]
    UnexpectedEof,
}

/// Write Frame0's raw token.
pub async fn write_frame0<W: AsyncWrite + Unpin>(w: &mut W) -> Result<(), FramingError> {
    w.write_all(FRAME0_TOKEN).await?;
    Ok(())
}

/// Read exactly `FRAME0_TOKEN.len()` bytes and check them against the
/// expected token. Uses a full-read primitive: a single short `read()`
/// is not guaranteed to return all 9 bytes over a real stream.
pub async fn read_frame0<R: AsyncRead + Unpin>(r: &mut R) -> Result<bool, FramingError> {
    let mut buf = [0u8; FRAME0_TOKEN.len()];
    r.read_exact(&mut buf).await?;
    Ok(buf == FRAME0_TOKEN)
}

/// Nonce used exactly once per handshake attempt.
pub type Nonce = [u8; 16];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame1 {
    #[serde(rename = "Nonce", with = "hex_nonce")]
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame2 {
    #[serde(rename = "SrcAddr")]
    pub src: Address,
    #[serde(rename = "DstAddr")]
    pub dst: Address,
    #[serde(rename = "Nonce", with = "hex_nonce")]
    pub nonce: Nonce,
    #[serde(rename = "Sig")]
    pub sig: Signature,
}

impl Frame2 {
    /// Return a copy with `sig` zeroed, for computing/verifying the signature.
    pub fn with_zero_sig(&self) -> Frame2 {
        Frame2 {
            sig: Signature::ZERO,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame3 {
    #[serde(rename = "OK")]
    pub ok: bool,
    #[serde(rename = "ErrMsg")]
    pub err_msg: String,
}

impl Frame3 {
    pub fn ok() -> Self {
        Frame3 {
            ok: true,
            err_msg: String::new(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Frame3 {
            ok: false,
            err_msg: msg.into(),
        }
    }
}

mod hex_nonce {
    use super::Nonce;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Nonce, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Nonce, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("nonce must be 16 bytes"))
    }
}

/// Write any structured frame as compact JSON terminated by a newline.
pub async fn write_json_frame<T: Serialize, W: AsyncWrite + Unpin>(
    w: &mut W,
    frame: &T,
) -> Result<(), FramingError> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    w.write_all(&bytes).await?;
    Ok(())
}

/// Read one newline-terminated JSON frame.
pub async fn read_json_frame<T: for<'de> Deserialize<'de>, R: AsyncBufRead + Unpin>(
    r: &mut R,
) -> Result<T, FramingError> {
    let mut line = String::new();
    let n = r.read_line(&mut line).await?;
    if n == 0 {
        return Err(FramingError::UnexpectedEof);
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

use tokio::io::AsyncBufRead;

/// Length-prefixed binary framing for CLI-style requests consumed by
/// external collaborators (`CfgReq`, `PtyReq`). No core component
/// depends on this; it's kept for wire-format completeness.
pub mod cli {
    use super::*;

    pub const VERSION: &str = "1.0";

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(u8)]
    pub enum RequestType {
        Cfg = 0,
        Pty = 1,
    }

    impl RequestType {
        fn from_tag(tag: u8) -> Result<Self, FramingError> {
            match tag {
                0 => Ok(RequestType::Cfg),
                1 => Ok(RequestType::Pty),
                other => Err(FramingError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown request type tag {other}"),
                ))),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Envelope<T> {
        pub version: String,
        pub body: T,
    }

    impl<T> Envelope<T> {
        pub fn new(body: T) -> Self {
            Self {
                version: VERSION.to_string(),
                body,
            }
        }
    }

    /// Write `[1-byte type tag][u16 BE length][JSON body]`.
    pub async fn write_request<T: Serialize, W: AsyncWrite + Unpin>(
        w: &mut W,
        kind: RequestType,
        body: &Envelope<T>,
    ) -> Result<(), FramingError> {
        let payload = serde_json::to_vec(body)?;
        if payload.len() > u16::MAX as usize {
            return Err(FramingError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cli request body exceeds u16 length field",
            )));
        }
        w.write_all(&[kind as u8]).await?;
        w.write_all(&(payload.len() as u16).to_be_bytes()).await?;
        w.write_all(&payload).await?;
        Ok(())
    }

    /// Read `[1-byte type tag][u16 BE length][JSON body]`.
    pub async fn read_request<T: for<'de> Deserialize<'de>, R: AsyncRead + Unpin>(
        r: &mut R,
    ) -> Result<(RequestType, Envelope<T>), FramingError> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag).await?;
        let kind = RequestType::from_tag(tag[0])?;
        let mut len_buf = [0u8; 2];
        r.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        r.read_exact(&mut body).await?;
        Ok((kind, serde_json::from_slice(&body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::PublicKey;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn frame0_round_trips() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame0(&mut a).await.unwrap();
        assert!(read_frame0(&mut b).await.unwrap());
    }

    #[tokio::test]
    async fn frame0_rejects_wrong_token() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"hello").await.unwrap();
        drop(a);
        let mut buf = [0u8; FRAME0_TOKEN.len()];
        assert!(b.read_exact(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn frame2_json_round_trips() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut b = BufReader::new(b);
        let src = Address {
            pk: PublicKey([1u8; 32]),
            port: 1,
        };
        let dst = Address {
            pk: PublicKey([2u8; 32]),
            port: 2,
        };
        let frame = Frame2 {
            src,
            dst,
            nonce: [9u8; 16],
            sig: overlay_core::Signature([7u8; 64]),
        };
        write_json_frame(&mut a, &frame).await.unwrap();
        let got: Frame2 = read_json_frame(&mut b).await.unwrap();
        assert_eq!(got.nonce, frame.nonce);
        assert_eq!(got.src.port, frame.src.port);
    }

    #[test]
    fn frame2_with_zero_sig_zeroes_only_sig() {
        let src = Address {
            pk: PublicKey([1u8; 32]),
            port: 1,
        };
        let dst = Address {
            pk: PublicKey([2u8; 32]),
            port: 2,
        };
        let frame = Frame2 {
            src,
            dst,
            nonce: [9u8; 16],
            sig: overlay_core::Signature([7u8; 64]),
        };
        let zeroed = frame.with_zero_sig();
        assert!(zeroed.sig.is_zero());
        assert_eq!(zeroed.nonce, frame.nonce);
    }

    #[tokio::test]
    async fn cli_request_round_trips() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let env = cli::Envelope::new("sessions list".to_string());
        cli::write_request(&mut a, cli::RequestType::Pty, &env)
            .await
            .unwrap();
        let (kind, got): (cli::RequestType, cli::Envelope<String>) =
            cli::read_request(&mut b).await.unwrap();
        assert_eq!(kind, cli::RequestType::Pty);
        assert_eq!(got.body, "sessions list");
    }
}
