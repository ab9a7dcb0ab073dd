//! # Strata Tuple
//!
//! Order-preserving tuple encoding for Strata.
//!
//! Tuples are heterogeneous sequences of typed scalars whose binary
//! encoding sorts bytewise in the same order as the logical values.
//! That property is what allows tuples to be used directly as keys in an
//! ordered key-value store: range scans over packed tuples return rows in
//! logical order with no decoding.
//!
//! ## Encoding rules
//!
//! - Each item starts with a type-code byte; codes are ordered so items of
//!   different types have a stable relative order
//! - Zero bytes inside text and byte strings are escaped as `0x00 0xFF`,
//!   keeping `0x00` as the terminator without breaking order
//! - Integers use a length-and-sign prefixed big-endian form; negative
//!   magnitudes are one's-complemented
//! - Doubles are IEEE-754 big-endian with a sign-flip transform so negative
//!   values sort before positive ones; `-0.0` normalizes to `0.0`
//! - Decoding is strict: truncated or malformed input is an error
//!
//! ## Usage
//!
//! ```
//! use strata_tuple::{pack, unpack, TupleItem};
//!
//! let items = vec![TupleItem::text("users"), TupleItem::Integer(42)];
//! let bytes = pack(&items).unwrap();
//! assert_eq!(unpack(&bytes).unwrap(), items);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::unpack;
pub use encoder::{equals, pack, pack_with_versionstamp, VersionstampedKey};
pub use error::{TupleError, TupleResult};
pub use value::{TupleItem, Versionstamp, VersionstampRef, MAX_SAFE_INTEGER};

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(items: Vec<TupleItem>) {
        let bytes = pack(&items).unwrap();
        let decoded = unpack(&bytes).unwrap();
        assert_eq!(decoded, items);
        assert_eq!(pack(&decoded).unwrap(), bytes);
    }

    #[test]
    fn roundtrip_scalars() {
        roundtrip(vec![TupleItem::Null]);
        roundtrip(vec![TupleItem::Boolean(false), TupleItem::Boolean(true)]);
        roundtrip(vec![TupleItem::text("hello world")]);
        roundtrip(vec![TupleItem::bytes(vec![1u8, 2, 3])]);
        roundtrip(vec![TupleItem::Integer(0)]);
        roundtrip(vec![TupleItem::Double(1.5)]);
    }

    #[test]
    fn roundtrip_integer_boundaries() {
        for v in [
            0,
            1,
            -1,
            255,
            256,
            -255,
            -256,
            65535,
            65536,
            -65536,
            MAX_SAFE_INTEGER,
            -MAX_SAFE_INTEGER,
        ] {
            roundtrip(vec![TupleItem::Integer(v)]);
        }
    }

    #[test]
    fn roundtrip_strings_with_zero_bytes() {
        roundtrip(vec![TupleItem::text("a\0b")]);
        roundtrip(vec![TupleItem::bytes(vec![0u8, 0, 0])]);
        roundtrip(vec![TupleItem::bytes(vec![0u8, 0xff, 0])]);
    }

    #[test]
    fn roundtrip_nested() {
        roundtrip(vec![
            TupleItem::Integer(1),
            TupleItem::Tuple(vec![
                TupleItem::Null,
                TupleItem::text("inner"),
                TupleItem::Tuple(vec![TupleItem::Integer(-7)]),
            ]),
            TupleItem::Boolean(true),
        ]);
    }

    #[test]
    fn roundtrip_versionstamp() {
        let vs = Versionstamp::from_parts([0, 0, 0, 0, 0, 0, 0, 9, 0, 1], [0, 4]);
        roundtrip(vec![TupleItem::text("events"), TupleItem::Versionstamp(vs)]);
    }

    #[test]
    fn negative_zero_packs_as_zero() {
        let neg = pack(&[TupleItem::Double(-0.0)]).unwrap();
        let pos = pack(&[TupleItem::Double(0.0)]).unwrap();
        assert_eq!(neg, pos);
        assert_eq!(unpack(&neg).unwrap(), vec![TupleItem::Double(0.0)]);
    }

    #[test]
    fn pack_rejects_invalid_values() {
        assert_eq!(
            pack(&[TupleItem::Double(f64::NAN)]),
            Err(TupleError::NonFiniteNumber)
        );
        assert_eq!(
            pack(&[TupleItem::Integer(MAX_SAFE_INTEGER + 1)]),
            Err(TupleError::UnsafeInteger {
                value: MAX_SAFE_INTEGER + 1
            })
        );
        assert_eq!(
            pack(&[TupleItem::Unresolved(VersionstampRef::new(0))]),
            Err(TupleError::UnresolvedVersionstamp)
        );
    }

    #[test]
    fn unpack_rejects_truncated_input() {
        let bytes = pack(&[TupleItem::Integer(65536)]).unwrap();
        assert!(unpack(&bytes[..bytes.len() - 1]).is_err());

        let bytes = pack(&[TupleItem::text("abc")]).unwrap();
        assert!(unpack(&bytes[..bytes.len() - 1]).is_err());

        let bytes = pack(&[TupleItem::Double(3.25)]).unwrap();
        assert!(unpack(&bytes[..4]).is_err());
    }

    #[test]
    fn unpack_rejects_unknown_codes() {
        assert_eq!(
            unpack(&[0x7f]),
            Err(TupleError::UnknownTypeCode { code: 0x7f })
        );
    }

    fn packed(items: &[TupleItem]) -> Vec<u8> {
        pack(items).unwrap()
    }

    #[test]
    fn integer_order_preserved() {
        let values = [
            -MAX_SAFE_INTEGER,
            -65536,
            -256,
            -255,
            -2,
            -1,
            0,
            1,
            2,
            255,
            256,
            65536,
            MAX_SAFE_INTEGER,
        ];
        for w in values.windows(2) {
            let a = packed(&[TupleItem::Integer(w[0])]);
            let b = packed(&[TupleItem::Integer(w[1])]);
            assert!(a < b, "{} should sort before {}", w[0], w[1]);
        }
    }

    #[test]
    fn double_order_preserved() {
        let values = [-1e10, -1.5, -1e-10, 0.0, 1e-10, 1.5, 1e10];
        for w in values.windows(2) {
            let a = packed(&[TupleItem::Double(w[0])]);
            let b = packed(&[TupleItem::Double(w[1])]);
            assert!(a < b, "{} should sort before {}", w[0], w[1]);
        }
    }

    #[test]
    fn string_order_preserved() {
        let a = packed(&[TupleItem::text("a")]);
        let a0 = packed(&[TupleItem::text("a\0")]);
        let a0b = packed(&[TupleItem::text("a\0b")]);
        let ab = packed(&[TupleItem::text("ab")]);
        let b = packed(&[TupleItem::text("b")]);
        assert!(a < a0);
        assert!(a0 < a0b);
        assert!(a0b < ab);
        assert!(ab < b);
    }

    #[test]
    fn type_codes_order_across_kinds() {
        let ordered = [
            packed(&[TupleItem::Null]),
            packed(&[TupleItem::bytes(vec![1u8])]),
            packed(&[TupleItem::text("a")]),
            packed(&[TupleItem::Tuple(vec![TupleItem::Integer(1)])]),
            packed(&[TupleItem::Integer(5)]),
            packed(&[TupleItem::Double(5.0)]),
            packed(&[TupleItem::Boolean(false)]),
            packed(&[TupleItem::Boolean(true)]),
            packed(&[TupleItem::Versionstamp(Versionstamp::from_bytes([0; 12]))]),
        ];
        for w in ordered.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn prefix_tuples_sort_first() {
        let short = packed(&[TupleItem::Integer(1)]);
        let long = packed(&[TupleItem::Integer(1), TupleItem::Integer(0)]);
        assert!(short < long);
    }

    #[test]
    fn versionstamped_key_split() {
        let items = vec![
            TupleItem::text("stream"),
            TupleItem::Unresolved(VersionstampRef::new(2)),
        ];
        let split = pack_with_versionstamp(&items).unwrap();

        let resolved = VersionstampRef::new(2).resolve([0, 0, 0, 0, 0, 0, 0, 3, 0, 0]);
        let full = pack(&[
            TupleItem::text("stream"),
            TupleItem::Versionstamp(resolved),
        ])
        .unwrap();

        let mut reassembled = split.prefix.clone();
        reassembled.extend_from_slice(resolved.transaction_bytes());
        reassembled.extend_from_slice(&split.suffix);
        assert_eq!(reassembled, full);
    }

    #[test]
    fn versionstamped_key_requires_exactly_one_placeholder() {
        assert_eq!(
            pack_with_versionstamp(&[TupleItem::Integer(1)]),
            Err(TupleError::VersionstampCount { found: 0 })
        );
        assert_eq!(
            pack_with_versionstamp(&[
                TupleItem::Unresolved(VersionstampRef::new(0)),
                TupleItem::Unresolved(VersionstampRef::new(1)),
            ]),
            Err(TupleError::VersionstampCount { found: 2 })
        );
    }

    #[test]
    fn equals_compares_canonical_form() {
        assert!(equals(
            &[TupleItem::Double(-0.0)],
            &[TupleItem::Double(0.0)]
        ));
        assert!(!equals(&[TupleItem::Integer(1)], &[TupleItem::Integer(2)]));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_scalar() -> impl Strategy<Value = TupleItem> {
            prop_oneof![
                Just(TupleItem::Null),
                any::<bool>().prop_map(TupleItem::Boolean),
                (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).prop_map(TupleItem::Integer),
                "[a-z0-9\\x00]{0,24}".prop_map(TupleItem::text),
                proptest::collection::vec(any::<u8>(), 0..24).prop_map(TupleItem::Bytes),
                any::<i32>().prop_map(|v| TupleItem::Double(f64::from(v) / 7.0)),
            ]
        }

        proptest! {
            #[test]
            fn roundtrip_any_tuple(items in proptest::collection::vec(arb_scalar(), 0..6)) {
                let bytes = pack(&items).unwrap();
                let decoded = unpack(&bytes).unwrap();
                prop_assert_eq!(pack(&decoded).unwrap(), bytes);
            }

            #[test]
            fn integer_order_matches_byte_order(
                a in -MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER,
                b in -MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER,
            ) {
                let pa = pack(&[TupleItem::Integer(a)]).unwrap();
                let pb = pack(&[TupleItem::Integer(b)]).unwrap();
                prop_assert_eq!(a.cmp(&b), pa.cmp(&pb));
            }

            #[test]
            fn string_order_matches_byte_order(a in "[a-z\\x00]{0,12}", b in "[a-z\\x00]{0,12}") {
                let pa = pack(&[TupleItem::text(a.clone())]).unwrap();
                let pb = pack(&[TupleItem::text(b.clone())]).unwrap();
                prop_assert_eq!(a.as_bytes().cmp(b.as_bytes()), pa.cmp(&pb));
            }
        }
    }
}
