//! Tuple unpacking.

use crate::encoder::{BYTES, DOUBLE, FALSE, INT_ZERO, NESTED, NULL, TEXT, TRUE, VERSIONSTAMP};
use crate::error::{TupleError, TupleResult};
use crate::value::{TupleItem, Versionstamp, MAX_SAFE_INTEGER};

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn completed(&self) -> bool {
        self.offset >= self.buf.len()
    }

    fn peek(&self) -> TupleResult<u8> {
        self.buf
            .get(self.offset)
            .copied()
            .ok_or(TupleError::UnexpectedEof)
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.buf.get(self.offset + ahead).copied()
    }

    fn read_byte(&mut self) -> TupleResult<u8> {
        let b = self.peek()?;
        self.offset += 1;
        Ok(b)
    }

    fn expect(&mut self, code: u8) -> TupleResult<()> {
        let b = self.read_byte()?;
        if b != code {
            return Err(TupleError::malformed(format!(
                "expected byte {code:#04x}, found {b:#04x}"
            )));
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> TupleResult<&'a [u8]> {
        if self.offset + len > self.buf.len() {
            return Err(TupleError::UnexpectedEof);
        }
        let out = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(out)
    }

    // Reads a zero-terminated run where embedded zeros are escaped as
    // `0x00 0xFF`. Truncated input is an error, never a short read.
    fn read_escaped(&mut self) -> TupleResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let b = self.read_byte()?;
            if b == 0 {
                if self.completed() || self.peek()? != 0xff {
                    break;
                }
                self.expect(0xff)?;
            }
            out.push(b);
        }
        Ok(out)
    }
}

fn decode_integer(reader: &mut Reader<'_>, code: u8) -> TupleResult<i64> {
    if code == INT_ZERO {
        return Ok(0);
    }
    let negative = code < INT_ZERO;
    let len = code.abs_diff(INT_ZERO) as usize;
    if len > 7 {
        return Err(TupleError::IntegerTooWide);
    }
    let raw = reader.take(len)?;
    let mut magnitude: u64 = 0;
    for &b in raw {
        let b = if negative { !b } else { b };
        magnitude = (magnitude << 8) | u64::from(b);
    }
    let value = if negative {
        -(magnitude as i64)
    } else {
        magnitude as i64
    };
    if !(-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value) {
        return Err(TupleError::IntegerTooWide);
    }
    Ok(value)
}

fn decode_double(reader: &mut Reader<'_>) -> TupleResult<f64> {
    let raw = reader.take(8)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(raw);
    if bytes[0] & 0x80 == 0 {
        for b in &mut bytes {
            *b = !*b;
        }
    } else {
        bytes[0] ^= 0x80;
    }
    let value = f64::from_be_bytes(bytes);
    if !value.is_finite() {
        return Err(TupleError::NonFiniteNumber);
    }
    Ok(value)
}

fn decode_item(reader: &mut Reader<'_>) -> TupleResult<TupleItem> {
    let code = reader.peek()?;
    match code {
        NULL => {
            reader.expect(NULL)?;
            Ok(TupleItem::Null)
        }
        BYTES => {
            reader.expect(BYTES)?;
            Ok(TupleItem::Bytes(reader.read_escaped()?))
        }
        TEXT => {
            reader.expect(TEXT)?;
            let raw = reader.read_escaped()?;
            String::from_utf8(raw)
                .map(TupleItem::Text)
                .map_err(|_| TupleError::InvalidUtf8)
        }
        NESTED => {
            reader.expect(NESTED)?;
            let mut items = Vec::new();
            loop {
                let next = reader.peek()?;
                if next == 0x00 {
                    if reader.peek_at(1) == Some(0xff) {
                        // Escaped null item inside the nested tuple.
                        reader.expect(0x00)?;
                        reader.expect(0xff)?;
                        items.push(TupleItem::Null);
                        continue;
                    }
                    reader.expect(0x00)?;
                    break;
                }
                items.push(decode_item(reader)?);
            }
            Ok(TupleItem::Tuple(items))
        }
        DOUBLE => {
            reader.expect(DOUBLE)?;
            Ok(TupleItem::Double(decode_double(reader)?))
        }
        FALSE => {
            reader.expect(FALSE)?;
            Ok(TupleItem::Boolean(false))
        }
        TRUE => {
            reader.expect(TRUE)?;
            Ok(TupleItem::Boolean(true))
        }
        VERSIONSTAMP => {
            reader.expect(VERSIONSTAMP)?;
            let raw = reader.take(12)?;
            let mut bytes = [0u8; 12];
            bytes.copy_from_slice(raw);
            Ok(TupleItem::Versionstamp(Versionstamp::from_bytes(bytes)))
        }
        code if (0x0c..=0x1c).contains(&code) => {
            reader.expect(code)?;
            Ok(TupleItem::Integer(decode_integer(reader, code)?))
        }
        code => Err(TupleError::UnknownTypeCode { code }),
    }
}

/// Unpacks a packed tuple.
///
/// # Errors
///
/// Fails on truncated or structurally invalid input. Never silently
/// truncates: every byte of the input must belong to a decoded item.
pub fn unpack(src: &[u8]) -> TupleResult<Vec<TupleItem>> {
    let mut reader = Reader::new(src);
    let mut items = Vec::new();
    while !reader.completed() {
        items.push(decode_item(&mut reader)?);
    }
    Ok(items)
}
