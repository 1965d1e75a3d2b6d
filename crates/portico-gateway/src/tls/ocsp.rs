//! OCSP staple inspection
//!
//! Only the fields staple policy needs are read: response status, the
//! certificate serial each single response covers, its cert status and the
//! `nextUpdate` bound. Signatures are not verified; the proxy serves the
//! staple and clients verify it.

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// `id-pkix-ocsp-basic`: 1.3.6.1.5.5.7.48.1.1
const OCSP_BASIC_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01];

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OID: u8 = 0x06;
const TAG_ENUMERATED: u8 = 0x0a;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_GENERALIZED_TIME: u8 = 0x18;
const TAG_CTX_0: u8 = 0xa0;
const TAG_CERT_GOOD: u8 = 0x80;
const TAG_CERT_REVOKED: u8 = 0xa1;

/// Why a staple cannot be served
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OcspError {
    /// The DER does not decode as an OCSP response
    #[error("malformed OCSP response: {0}")]
    Malformed(&'static str),

    /// The responder did not answer successfully
    #[error("OCSP response status {0} is not successful")]
    Unsuccessful(u8),

    /// No single response covers the leaf certificate
    #[error("OCSP response does not cover the certificate")]
    SerialMismatch,

    /// The certificate is revoked or unknown to the responder
    #[error("OCSP response reports the certificate as {0}")]
    NotGood(&'static str),

    /// `nextUpdate` has passed
    #[error("OCSP response expired at {next_update}")]
    Expired {
        /// When the response stopped being current
        next_update: DateTime<Utc>,
    },
}

/// Certificate status in a single response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertStatus {
    /// Not revoked
    Good,
    /// Revoked
    Revoked,
    /// Unknown to the responder
    Unknown,
}

/// One `SingleResponse`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SingleResponse {
    /// Serial number of the certificate covered, minimal big-endian bytes
    pub serial: Vec<u8>,
    /// Its status
    pub status: CertStatus,
    /// When the status was known to be correct
    pub this_update: DateTime<Utc>,
    /// When newer information will be available
    pub next_update: Option<DateTime<Utc>>,
}

/// The parts of an OCSP response staple policy looks at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OcspResponse {
    /// Single responses in order
    pub responses: Vec<SingleResponse>,
}

impl OcspResponse {
    /// Decode a DER `OCSPResponse`
    pub fn parse(der: &[u8]) -> Result<Self, OcspError> {
        let mut outer = Reader::new(der).sequence()?;
        let status = outer.expect(TAG_ENUMERATED, "responseStatus")?;
        let status = status.first().copied().unwrap_or(0xff);
        if status != 0 {
            return Err(OcspError::Unsuccessful(status));
        }

        let mut bytes = outer.explicit(TAG_CTX_0, "responseBytes")?.sequence()?;
        let oid = bytes.expect(TAG_OID, "responseType")?;
        if oid != OCSP_BASIC_OID {
            return Err(OcspError::Malformed("response type is not basic"));
        }
        let basic = bytes.expect(TAG_OCTET_STRING, "response")?;

        let mut basic = Reader::new(basic).sequence()?;
        let mut data = basic.sequence()?;
        if data.peek_tag() == Some(TAG_CTX_0) {
            data.any()?;
        }
        // responderID, then producedAt
        data.any()?;
        data.expect(TAG_GENERALIZED_TIME, "producedAt")?;

        let mut list = data.sequence()?;
        let mut responses = Vec::new();
        while !list.is_empty() {
            responses.push(parse_single(list.sequence()?)?);
        }
        Ok(Self { responses })
    }

    /// Check that the response covers `serial` with a good, current status
    pub fn check(&self, serial: &[u8], now: DateTime<Utc>) -> Result<(), OcspError> {
        let serial = trim_integer(serial);
        let single = self
            .responses
            .iter()
            .find(|r| r.serial == serial)
            .ok_or(OcspError::SerialMismatch)?;
        match single.status {
            CertStatus::Good => {}
            CertStatus::Revoked => return Err(OcspError::NotGood("revoked")),
            CertStatus::Unknown => return Err(OcspError::NotGood("unknown")),
        }
        if let Some(next_update) = single.next_update {
            if next_update < now {
                return Err(OcspError::Expired { next_update });
            }
        }
        Ok(())
    }
}

fn parse_single(mut single: Reader<'_>) -> Result<SingleResponse, OcspError> {
    let mut cert_id = single.sequence()?;
    cert_id.any()?; // hashAlgorithm
    cert_id.expect(TAG_OCTET_STRING, "issuerNameHash")?;
    cert_id.expect(TAG_OCTET_STRING, "issuerKeyHash")?;
    let serial = trim_integer(cert_id.expect(TAG_INTEGER, "serialNumber")?);

    let (tag, _) = single.any()?;
    let status = match tag {
        TAG_CERT_GOOD => CertStatus::Good,
        TAG_CERT_REVOKED => CertStatus::Revoked,
        _ => CertStatus::Unknown,
    };

    let this_update = generalized_time(single.expect(TAG_GENERALIZED_TIME, "thisUpdate")?)?;
    let next_update = if single.peek_tag() == Some(TAG_CTX_0) {
        let mut inner = single.explicit(TAG_CTX_0, "nextUpdate")?;
        Some(generalized_time(inner.expect(TAG_GENERALIZED_TIME, "nextUpdate")?)?)
    } else {
        None
    };

    Ok(SingleResponse {
        serial,
        status,
        this_update,
        next_update,
    })
}

/// Strip the sign-padding zero bytes of a DER integer
fn trim_integer(bytes: &[u8]) -> Vec<u8> {
    let start = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len().saturating_sub(1));
    bytes[start..].to_vec()
}

/// Parse `YYYYMMDDHHMMSSZ`, ignoring fractional seconds
fn generalized_time(bytes: &[u8]) -> Result<DateTime<Utc>, OcspError> {
    let text = std::str::from_utf8(bytes).map_err(|_| OcspError::Malformed("time is not ASCII"))?;
    let text = text
        .strip_suffix('Z')
        .ok_or(OcspError::Malformed("time is not UTC"))?;
    let text = text.split('.').next().unwrap_or(text);
    NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%S")
        .map(|t| t.and_utc())
        .map_err(|_| OcspError::Malformed("invalid GeneralizedTime"))
}

/// Minimal DER TLV reader
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn peek_tag(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// Next TLV as (tag, contents)
    fn any(&mut self) -> Result<(u8, &'a [u8]), OcspError> {
        let (&tag, rest) = self
            .buf
            .split_first()
            .ok_or(OcspError::Malformed("unexpected end of input"))?;
        let (&first, mut rest) = rest
            .split_first()
            .ok_or(OcspError::Malformed("missing length"))?;
        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let n = usize::from(first & 0x7f);
            if n == 0 || n > 4 || rest.len() < n {
                return Err(OcspError::Malformed("bad length"));
            }
            let len = rest[..n].iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
            rest = &rest[n..];
            len
        };
        if rest.len() < len {
            return Err(OcspError::Malformed("length exceeds input"));
        }
        let (contents, tail) = rest.split_at(len);
        self.buf = tail;
        Ok((tag, contents))
    }

    fn expect(&mut self, tag: u8, what: &'static str) -> Result<&'a [u8], OcspError> {
        match self.any()? {
            (t, contents) if t == tag => Ok(contents),
            _ => Err(OcspError::Malformed(what)),
        }
    }

    fn sequence(&mut self) -> Result<Reader<'a>, OcspError> {
        self.expect(TAG_SEQUENCE, "expected SEQUENCE").map(Reader::new)
    }

    fn explicit(&mut self, tag: u8, what: &'static str) -> Result<Reader<'a>, OcspError> {
        self.expect(tag, what).map(Reader::new)
    }
}
