//! Tuple packing.

use crate::error::{TupleError, TupleResult};
use crate::value::{check_safe_integer, normalize_double, TupleItem};

pub(crate) const NULL: u8 = 0x00;
pub(crate) const BYTES: u8 = 0x01;
pub(crate) const TEXT: u8 = 0x02;
pub(crate) const NESTED: u8 = 0x05;
pub(crate) const INT_ZERO: u8 = 0x14;
pub(crate) const DOUBLE: u8 = 0x21;
pub(crate) const FALSE: u8 = 0x26;
pub(crate) const TRUE: u8 = 0x27;
pub(crate) const VERSIONSTAMP: u8 = 0x33;

/// Packed form of a tuple containing exactly one versionstamp placeholder.
///
/// The backend completes the key by writing the 10-byte commit token
/// between `prefix` and `suffix` at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionstampedKey {
    /// Encoded bytes up to the start of the 10-byte commit-token region.
    pub prefix: Vec<u8>,
    /// Encoded bytes after the commit-token region, beginning with the
    /// 2-byte caller index.
    pub suffix: Vec<u8>,
}

struct Encoder {
    buf: Vec<u8>,
    // Offsets where a 10-byte commit-token placeholder was written.
    placeholders: Vec<usize>,
}

impl Encoder {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            placeholders: Vec::new(),
        }
    }

    fn push_escaped(&mut self, src: &[u8]) {
        for &b in src {
            self.buf.push(b);
            // A zero byte would terminate the item early, escape it.
            if b == 0 {
                self.buf.push(0xff);
            }
        }
        self.buf.push(0x00);
    }

    fn encode_integer(&mut self, value: i64) -> TupleResult<()> {
        let value = check_safe_integer(value)?;
        if value == 0 {
            self.buf.push(INT_ZERO);
            return Ok(());
        }
        let abs = value.unsigned_abs();
        let len = ((64 - abs.leading_zeros()) as usize).div_ceil(8);
        let be = if value > 0 {
            self.buf.push(INT_ZERO + len as u8);
            abs.to_be_bytes()
        } else {
            self.buf.push(INT_ZERO - len as u8);
            // Negative magnitudes are stored one's-complemented so larger
            // magnitudes sort earlier.
            (!abs).to_be_bytes()
        };
        self.buf.extend_from_slice(&be[8 - len..]);
        Ok(())
    }

    fn encode_double(&mut self, value: f64) -> TupleResult<()> {
        let normalized = normalize_double(value)?;
        self.buf.push(DOUBLE);
        let mut bytes = normalized.to_be_bytes();
        if bytes[0] & 0x80 == 0x80 {
            // Negative: invert everything so magnitude order reverses.
            for b in &mut bytes {
                *b = !*b;
            }
        } else {
            // Positive: set the sign bit so positives sort above negatives.
            bytes[0] ^= 0x80;
        }
        self.buf.extend_from_slice(&bytes);
        Ok(())
    }

    fn encode_item(&mut self, item: &TupleItem, nested: bool) -> TupleResult<()> {
        match item {
            TupleItem::Null => {
                if nested {
                    // Inside a nested tuple a bare zero would terminate the
                    // tuple, so null is escaped the same way as in strings.
                    self.buf.push(NULL);
                    self.buf.push(0xff);
                } else {
                    self.buf.push(NULL);
                }
            }
            TupleItem::Integer(v) => self.encode_integer(*v)?,
            TupleItem::Double(v) => self.encode_double(*v)?,
            TupleItem::Boolean(v) => self.buf.push(if *v { TRUE } else { FALSE }),
            TupleItem::Text(v) => {
                self.buf.push(TEXT);
                self.push_escaped(v.as_bytes());
            }
            TupleItem::Bytes(v) => {
                self.buf.push(BYTES);
                self.push_escaped(v);
            }
            TupleItem::Versionstamp(vs) => {
                self.buf.push(VERSIONSTAMP);
                self.buf.extend_from_slice(vs.as_bytes());
            }
            TupleItem::Unresolved(r) => {
                self.buf.push(VERSIONSTAMP);
                self.placeholders.push(self.buf.len());
                self.buf.extend_from_slice(&[0u8; 10]);
                self.buf.extend_from_slice(&r.index_bytes());
            }
            TupleItem::Tuple(items) => {
                self.buf.push(NESTED);
                for inner in items {
                    self.encode_item(inner, true)?;
                }
                self.buf.push(0x00);
            }
        }
        Ok(())
    }
}

/// Packs a tuple into its order-preserving binary form.
///
/// # Errors
///
/// Fails on non-finite doubles, integers outside the safe 53-bit range,
/// and unresolved versionstamp placeholders (those require
/// [`pack_with_versionstamp`]).
pub fn pack(items: &[TupleItem]) -> TupleResult<Vec<u8>> {
    let mut enc = Encoder::new();
    for item in items {
        enc.encode_item(item, false)?;
    }
    if !enc.placeholders.is_empty() {
        return Err(TupleError::UnresolvedVersionstamp);
    }
    Ok(enc.buf)
}

/// Packs a tuple containing exactly one unresolved versionstamp and splits
/// the encoding around the 10-byte commit-token region.
///
/// # Errors
///
/// Fails with [`TupleError::VersionstampCount`] unless exactly one
/// placeholder is present, plus all the failures of [`pack`].
pub fn pack_with_versionstamp(items: &[TupleItem]) -> TupleResult<VersionstampedKey> {
    let mut enc = Encoder::new();
    for item in items {
        enc.encode_item(item, false)?;
    }
    if enc.placeholders.len() != 1 {
        return Err(TupleError::VersionstampCount {
            found: enc.placeholders.len(),
        });
    }
    let at = enc.placeholders[0];
    let suffix = enc.buf.split_off(at + 10);
    enc.buf.truncate(at);
    Ok(VersionstampedKey {
        prefix: enc.buf,
        suffix,
    })
}

/// Compares two tuples by their canonical packed form.
///
/// Returns `false` when either side is unpackable.
pub fn equals(a: &[TupleItem], b: &[TupleItem]) -> bool {
    match (pack(a), pack(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}
