use docpack::{
    ArrayScope, AttributeTranslator, Builder, Error, ObjectScope, Options, PaddingBehavior,
    Serializable, Slice, Value,
};
use std::sync::Arc;

#[test]
fn empty_array() {
    let mut b = Builder::new();
    b.open_array(false).unwrap();
    b.close().unwrap();
    assert_eq!(b.data(), &[0x01]);
}

#[test]
fn empty_object() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    b.close().unwrap();
    assert_eq!(b.data(), &[0x0a]);
}

#[test]
fn small_int_array() {
    let mut b = Builder::new();
    b.open_array(false).unwrap();
    b.add(0).unwrap();
    b.add(1).unwrap();
    b.add(9).unwrap();
    b.close().unwrap();

    // 1-byte width: header, byte length, count, members, offset table
    assert_eq!(
        b.data(),
        &[0x02, 0x09, 0x03, 0x30, 0x31, 0x39, 0x03, 0x04, 0x05]
    );

    let arr = b.slice().unwrap();
    assert_eq!(arr.length().unwrap(), 3);
    assert_eq!(arr.at(0).unwrap().to_i64().unwrap(), 0);
    assert_eq!(arr.at(2).unwrap().to_i64().unwrap(), 9);
}

#[test]
fn object_keys_are_sorted() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    b.insert("b", 1).unwrap();
    b.insert("a", 2).unwrap();
    b.close().unwrap();

    let obj = b.slice().unwrap();
    assert_eq!(obj.type_byte(), 0x0b);
    assert_eq!(obj.length().unwrap(), 2);
    // index order follows the sorted keys, not insertion order
    assert_eq!(obj.key_at(0).unwrap().to_str().unwrap(), "a");
    assert_eq!(obj.value_at(0).unwrap().to_i64().unwrap(), 2);
    assert_eq!(obj.key_at(1).unwrap().to_str().unwrap(), "b");
    assert_eq!(obj.value_at(1).unwrap().to_i64().unwrap(), 1);
    assert_eq!(obj.get("a").unwrap().unwrap().to_i64().unwrap(), 2);
    assert_eq!(obj.get("b").unwrap().unwrap().to_i64().unwrap(), 1);
    assert!(obj.get("c").unwrap().is_none());
}

#[test]
fn nested_array_in_object() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    b.insert("xs", Value::array()).unwrap();
    b.add(1).unwrap();
    b.add(2).unwrap();
    b.add(3).unwrap();
    b.close().unwrap();
    b.close().unwrap();

    let obj = b.slice().unwrap();
    assert_eq!(obj.length().unwrap(), 1);
    let xs = obj.get("xs").unwrap().unwrap();
    assert_eq!(
        xs.as_bytes().unwrap(),
        &[0x02, 0x09, 0x03, 0x31, 0x32, 0x33, 0x03, 0x04, 0x05]
    );
}

#[test]
fn tagged_string() {
    let mut b = Builder::new();
    b.add_tagged(42, "hi").unwrap();
    assert_eq!(b.data(), &[0xee, 0x2a, 0x42, 0x68, 0x69]);

    let s = b.slice().unwrap();
    assert_eq!(s.tag().unwrap(), 42);
    assert_eq!(s.tagged_value().unwrap().to_str().unwrap(), "hi");
}

#[test]
fn long_tag_uses_eight_bytes() {
    let mut b = Builder::new();
    b.add_tagged(0x1234, 7).unwrap();
    assert_eq!(
        b.data(),
        &[0xef, 0x34, 0x12, 0, 0, 0, 0, 0, 0, 0x37]
    );
    assert_eq!(b.slice().unwrap().tag().unwrap(), 0x1234);
}

#[test]
fn tagged_pair_value() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    b.insert_tagged("k", 5, 1).unwrap();
    b.close().unwrap();

    let v = b.get_key("k").unwrap().unwrap();
    assert_eq!(v.tag().unwrap(), 5);
    assert_eq!(v.tagged_value().unwrap().to_i64().unwrap(), 1);
}

#[test]
fn encode_single_value() {
    let bytes = Builder::encode_single(Value::Str("hi")).unwrap();
    assert_eq!(bytes.as_ref(), &[0x42, 0x68, 0x69]);
    // a value that leaves a compound open cannot seal
    assert!(Builder::encode_single(Value::array()).is_err());
}

#[test]
fn cursor_adjustments() {
    let mut b = Builder::new();
    b.reserve(16).unwrap();
    b.advance(3).unwrap();
    assert_eq!(b.data(), &[0, 0, 0]);
    b.reset_to(1).unwrap();
    assert_eq!(b.data(), &[0]);
    assert_eq!(b.reset_to(2).unwrap_err(), Error::OutOfRange);
}

#[test]
fn zero_tag_is_elided() {
    let mut b = Builder::new();
    b.add_tagged(0, 7).unwrap();
    assert_eq!(b.data(), &[0x37]);
}

#[test]
fn failed_insert_rolls_back() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    let pos = b.data().len();

    // 0x15 is an unassigned type byte, so copying this slice fails
    // while the key has already been written
    let bad = [0x15u8];
    let err = b.insert("k", Value::Slice(Slice::new(&bad))).unwrap_err();
    assert_eq!(err, Error::Internal);

    assert!(b.is_open_object());
    assert_eq!(b.data().len(), pos);

    // the builder is fully usable afterwards
    b.insert("k", 1).unwrap();
    b.close().unwrap();
    assert_eq!(b.get_key("k").unwrap().unwrap().to_i64().unwrap(), 1);
}

#[test]
fn failed_value_after_bare_key_keeps_the_key() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    b.add("k").unwrap();
    let pos = b.data().len();

    let bad = [0x15u8];
    assert!(b.add(Value::Slice(Slice::new(&bad))).is_err());
    assert_eq!(b.data().len(), pos);

    // the pending key still wants its value
    b.add(1).unwrap();
    b.close().unwrap();
    assert!(b.has_key("k").unwrap());
}

#[test]
fn disallowed_bcd_rolls_back() {
    let mut options = Options::default();
    options.disallow_bcd = true;
    let mut b = Builder::with_options(options);
    b.open_object(false).unwrap();
    let pos = b.data().len();

    let err = b
        .insert(
            "n",
            Value::Bcd {
                sign: 1,
                exponent: 0,
                mantissa: &[1, 2],
            },
        )
        .unwrap_err();
    assert_eq!(err, Error::BcdDisallowed);
    assert_eq!(b.data().len(), pos);
    b.close().unwrap();
    assert_eq!(b.data(), &[0x0a]);
}

#[test]
fn bcd_encoding() {
    let mut b = Builder::new();
    b.add_bcd(1, -2, &[1, 2, 3]).unwrap();
    // header, 1-byte length 2, exponent -2 little-endian, lone leading
    // digit, packed pair
    assert_eq!(b.data(), &[0xc8, 0x02, 0xfe, 0xff, 0xff, 0xff, 0x01, 0x23]);

    let mut b = Builder::new();
    b.add_bcd(-1, 0, &[4, 2]).unwrap();
    assert_eq!(b.data(), &[0xd0, 0x01, 0x00, 0x00, 0x00, 0x00, 0x42]);
}

#[test]
fn compact_array() {
    let mut b = Builder::new();
    b.open_array(true).unwrap();
    b.add(1).unwrap();
    b.add(2).unwrap();
    b.add(3).unwrap();
    b.close().unwrap();
    // header, forward varint byte length, members, backward varint count
    assert_eq!(b.data(), &[0x13, 0x06, 0x31, 0x32, 0x33, 0x03]);

    let arr = b.slice().unwrap();
    assert_eq!(arr.length().unwrap(), 3);
    assert_eq!(arr.at(1).unwrap().to_i64().unwrap(), 2);
}

#[test]
fn compact_object() {
    let mut b = Builder::new();
    b.open_object(true).unwrap();
    b.insert("a", 1).unwrap();
    b.insert("b", 2).unwrap();
    b.close().unwrap();
    assert_eq!(
        b.data(),
        &[0x14, 0x09, 0x41, 0x61, 0x31, 0x41, 0x62, 0x32, 0x02]
    );

    let obj = b.slice().unwrap();
    assert_eq!(obj.length().unwrap(), 2);
    // compact objects keep insertion order and are scanned linearly
    assert_eq!(obj.key_at(0).unwrap().to_str().unwrap(), "a");
    assert_eq!(obj.get("b").unwrap().unwrap().to_i64().unwrap(), 2);
}

#[test]
fn compact_empty_compound_degrades_to_empty_form() {
    let mut b = Builder::new();
    b.open_array(true).unwrap();
    b.close().unwrap();
    assert_eq!(b.data(), &[0x01]);
}

#[test]
fn two_byte_width_selected_when_count_overflows() {
    let mut b = Builder::new();
    b.open_array(false).unwrap();
    for _ in 0..300 {
        b.add(0).unwrap();
    }
    b.close().unwrap();

    let data = b.data();
    assert_eq!(data[0], 0x03);
    // total: 5 header bytes, 300 members, 600 table bytes
    assert_eq!(data.len(), 905);
    assert_eq!(u16::from_le_bytes([data[1], data[2]]), 905);
    assert_eq!(u16::from_le_bytes([data[3], data[4]]), 300);

    let arr = b.slice().unwrap();
    assert_eq!(arr.length().unwrap(), 300);
    assert_eq!(arr.at(299).unwrap().to_i64().unwrap(), 0);
}

#[test]
fn one_byte_width_holds_up_to_its_limit() {
    // 250 one-byte members: 3 + 250 + 250 > 255 forces 2-byte width;
    // 120 members: 3 + 120 + 120 = 243 stays 1-byte
    let mut b = Builder::new();
    b.open_array(false).unwrap();
    for _ in 0..120 {
        b.add(1).unwrap();
    }
    b.close().unwrap();
    assert_eq!(b.data()[0], 0x02);
    assert_eq!(b.data()[1] as usize, b.data().len());

    let mut b = Builder::new();
    b.open_array(false).unwrap();
    for _ in 0..250 {
        b.add(1).unwrap();
    }
    b.close().unwrap();
    assert_eq!(b.data()[0], 0x03);
}

#[test]
fn padding_keeps_the_reserved_header() {
    let mut options = Options::default();
    options.padding_behavior = PaddingBehavior::UsePadding;
    let mut b = Builder::with_options(options);
    b.open_array(false).unwrap();
    b.add(0).unwrap();
    b.add(1).unwrap();
    b.add(9).unwrap();
    b.close().unwrap();

    assert_eq!(
        b.data(),
        &[0x02, 0x0f, 0x03, 0, 0, 0, 0, 0, 0, 0x30, 0x31, 0x39, 0x09, 0x0a, 0x0b]
    );
    let arr = b.slice().unwrap();
    assert_eq!(arr.at(0).unwrap().to_i64().unwrap(), 0);
    assert_eq!(arr.at(2).unwrap().to_i64().unwrap(), 9);
}

#[test]
fn unsorted_objects_when_sorting_disabled() {
    let mut options = Options::default();
    options.sort_object_keys = false;
    let mut b = Builder::with_options(options);
    b.open_object(false).unwrap();
    b.insert("b", 1).unwrap();
    b.insert("a", 2).unwrap();
    b.close().unwrap();

    let obj = b.slice().unwrap();
    assert_eq!(obj.type_byte(), 0x0f);
    // insertion order survives
    assert_eq!(obj.key_at(0).unwrap().to_str().unwrap(), "b");
    assert_eq!(obj.key_at(1).unwrap().to_str().unwrap(), "a");
    assert_eq!(obj.get("a").unwrap().unwrap().to_i64().unwrap(), 2);
}

#[test]
fn many_keys_sort_correctly() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    // enough members to leave the insertion-sort path
    for i in (0..40).rev() {
        b.insert(&format!("key{:02}", i), i).unwrap();
    }
    b.close().unwrap();

    let obj = b.slice().unwrap();
    assert_eq!(obj.length().unwrap(), 40);
    let mut previous = Vec::new();
    for i in 0..40 {
        let key = obj.key_at(i).unwrap().string_bytes().unwrap().to_vec();
        assert!(previous < key);
        previous = key;
    }
    assert_eq!(obj.get("key07").unwrap().unwrap().to_i64().unwrap(), 7);
}

#[test]
fn duplicate_attribute_check() {
    let mut options = Options::default();
    options.check_attribute_uniqueness = true;
    let mut b = Builder::with_options(options);
    b.open_object(false).unwrap();
    b.insert("a", 1).unwrap();
    b.insert("a", 2).unwrap();
    assert_eq!(b.close().unwrap_err(), Error::DuplicateAttributeName);

    // the frame is still open and the builder usable
    assert!(b.is_open_object());
    b.insert("b", 3).unwrap();
    assert_eq!(b.close().unwrap_err(), Error::DuplicateAttributeName);
}

#[test]
fn duplicate_keys_pass_without_the_check() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    b.insert("a", 1).unwrap();
    b.insert("a", 2).unwrap();
    b.close().unwrap();
    assert_eq!(b.slice().unwrap().length().unwrap(), 2);
}

#[test]
fn key_sequencing_errors() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();

    // a non-string cannot start a pair
    assert_eq!(b.add(1.5f64).unwrap_err(), Error::KeyMustBeString);
    // a compound cannot be a key
    assert_eq!(b.open_array(false).unwrap_err(), Error::KeyMustBeString);

    b.add("k").unwrap();
    // a second key without a value
    assert_eq!(b.insert("l", 1).unwrap_err(), Error::KeyAlreadyWritten);
    b.add(1).unwrap();
    b.close().unwrap();
}

#[test]
fn bare_key_then_value_pairs() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    b.add("k").unwrap();
    b.add(7).unwrap();
    b.close().unwrap();
    assert_eq!(b.get_key("k").unwrap().unwrap().to_i64().unwrap(), 7);
}

#[test]
fn insert_outside_object() {
    let mut b = Builder::new();
    assert_eq!(b.insert("k", 1).unwrap_err(), Error::NeedOpenObject);
    b.open_array(false).unwrap();
    assert_eq!(b.insert("k", 1).unwrap_err(), Error::NeedOpenObject);
}

#[test]
fn unsealed_queries_fail() {
    let mut b = Builder::new();
    b.open_array(false).unwrap();
    assert_eq!(b.slice().unwrap_err(), Error::NotSealed);
    assert_eq!(b.size().unwrap_err(), Error::NotSealed);
    assert_eq!(b.start().unwrap_err(), Error::NotSealed);
    assert_eq!(b.shared_slice().unwrap_err(), Error::NotSealed);
    b.close().unwrap();
    assert_eq!(b.size().unwrap(), 1);
}

#[test]
fn externals_disallowed_by_default() {
    let mut b = Builder::new();
    let byte = 0u8;
    assert_eq!(
        b.add_external(&byte as *const u8).unwrap_err(),
        Error::ExternalsDisallowed
    );
}

#[test]
fn external_embeds_the_address() {
    let mut options = Options::default();
    options.disallow_externals = false;
    let mut b = Builder::with_options(options);
    let byte = 0u8;
    let ptr = &byte as *const u8;
    b.add_external(ptr).unwrap();

    let data = b.data();
    assert_eq!(data[0], 0x1d);
    assert_eq!(data.len(), 1 + std::mem::size_of::<usize>());
    assert_eq!(
        usize::from_ne_bytes(data[1..].try_into().unwrap()),
        ptr as usize
    );
}

#[test]
fn utc_date_round_trip() {
    let mut b = Builder::new();
    b.add(Value::UtcDate(-1_000)).unwrap();
    assert_eq!(b.data()[0], 0x1c);
    assert_eq!(b.slice().unwrap().utc_date_millis().unwrap(), -1_000);
}

#[test]
fn long_string() {
    let text = "x".repeat(200);
    let mut b = Builder::new();
    b.add(text.as_str()).unwrap();

    let data = b.data();
    assert_eq!(data[0], 0xbf);
    assert_eq!(u64::from_le_bytes(data[1..9].try_into().unwrap()), 200);
    assert_eq!(b.slice().unwrap().to_str().unwrap(), text);
}

#[test]
fn binary_blob() {
    let mut b = Builder::new();
    b.add(Value::Binary(&[0xde, 0xad, 0xbe, 0xef])).unwrap();
    assert_eq!(b.data(), &[0xc0, 0x04, 0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(
        b.slice().unwrap().binary_bytes().unwrap(),
        &[0xde, 0xad, 0xbe, 0xef]
    );
}

#[test]
fn double_preserves_bits() {
    for v in [0.0f64, -0.0, 1.5, f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
        let mut b = Builder::new();
        b.add(v).unwrap();
        assert_eq!(
            b.slice().unwrap().to_f64().unwrap().to_bits(),
            v.to_bits()
        );
    }
}

#[test]
fn clear_is_idempotent_and_reusable() {
    let build = |b: &mut Builder| {
        b.open_object(false).unwrap();
        b.insert("k", "v").unwrap();
        b.close().unwrap();
    };

    let mut b = Builder::new();
    build(&mut b);
    let first = b.data().to_vec();

    b.clear();
    b.clear();
    assert!(b.is_empty());
    build(&mut b);
    assert_eq!(b.data(), first.as_slice());
}

#[test]
fn steal_and_reuse_the_allocation() {
    let mut b = Builder::new();
    b.add(1).unwrap();
    let stolen = b.steal();
    assert_eq!(stolen.as_ref(), &[0x31]);
    assert!(b.is_empty());
    assert!(b.is_closed());

    let mut b = Builder::with_buffer(stolen);
    assert!(b.is_empty());
    b.add(2).unwrap();
    assert_eq!(b.data(), &[0x32]);
}

#[test]
fn shared_slice_views() {
    let mut b = Builder::new();
    b.open_array(false).unwrap();
    b.add("x").unwrap();
    b.close().unwrap();

    let copied = b.shared_slice().unwrap();
    assert_eq!(copied.as_ref(), b.data());

    let frozen = b.into_shared_slice().unwrap();
    assert_eq!(frozen, copied);
}

#[test]
fn translated_keys() {
    let mut translator = AttributeTranslator::new();
    translator.add("_key", 1).unwrap();
    translator.add("_rev", 2).unwrap();
    translator.seal();

    let mut options = Options::default();
    options.attribute_translator = Some(Arc::new(translator));
    let mut b = Builder::with_options(options);

    b.open_object(false).unwrap();
    b.insert("_rev", 9).unwrap();
    b.insert("_key", 7).unwrap();
    b.insert("name", "doc").unwrap();
    b.close().unwrap();

    // translated keys shrink to their dictionary ids
    assert_eq!(b.get_key("_key").unwrap().unwrap().to_i64().unwrap(), 7);
    assert_eq!(b.get_key("_rev").unwrap().unwrap().to_i64().unwrap(), 9);
    assert_eq!(
        b.get_key("name").unwrap().unwrap().to_str().unwrap(),
        "doc"
    );
    assert!(b.get_key("_id").unwrap().is_none());
}

#[test]
fn translator_swap_requires_closed_builder() {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    assert!(b
        .set_attribute_translator(Some(Arc::new(AttributeTranslator::new())))
        .is_err());
    b.close().unwrap();
    b.clear();
    b.set_attribute_translator(None).unwrap();
}

struct Point {
    x: i64,
    y: i64,
}

impl Serializable for Point {
    fn serialize_into(&self, builder: &mut Builder) -> docpack::Result<()> {
        builder.add(Value::object())?;
        builder.insert("x", self.x)?;
        builder.insert("y", self.y)?;
        builder.close()
    }
}

#[test]
fn serializable_values() {
    let p = Point { x: 3, y: -4 };

    let mut b = Builder::new();
    b.open_array(false).unwrap();
    b.add_serializable(&p).unwrap();
    b.close().unwrap();
    let arr = b.slice().unwrap();
    assert_eq!(arr.length().unwrap(), 1);
    assert_eq!(
        arr.at(0).unwrap().get("y").unwrap().unwrap().to_i64().unwrap(),
        -4
    );

    let mut b = Builder::new();
    b.open_object(false).unwrap();
    b.insert_serializable("origin", &p).unwrap();
    b.close().unwrap();
    let obj = b.slice().unwrap();
    assert_eq!(
        obj.get("origin")
            .unwrap()
            .unwrap()
            .get("x")
            .unwrap()
            .unwrap()
            .to_i64()
            .unwrap(),
        3
    );
}

#[test]
fn scopes_auto_close() {
    let mut b = Builder::new();
    {
        let mut obj = ObjectScope::new(&mut b).unwrap();
        obj.insert("n", 1).unwrap();
        {
            let mut arr = ArrayScope::keyed(&mut obj, "xs").unwrap();
            arr.add(1).unwrap();
            arr.add(2).unwrap();
        }
    }
    assert!(b.is_closed());
    let obj = b.slice().unwrap();
    assert_eq!(obj.get("xs").unwrap().unwrap().length().unwrap(), 2);
}

#[test]
fn canonical_int_widths() {
    let cases: &[(i64, usize)] = &[
        (9, 1),
        (10, 2),
        (127, 2),
        (128, 3),
        (-7, 2),
        (-128, 2),
        (-129, 3),
        (32767, 3),
        (32768, 4),
        (i64::MAX, 9),
        (i64::MIN, 9),
    ];
    for &(v, expected) in cases {
        let mut b = Builder::new();
        b.add(v).unwrap();
        assert_eq!(b.size().unwrap(), expected, "encoding {}", v);
        assert_eq!(b.slice().unwrap().to_i64().unwrap(), v);
    }
}

#[test]
fn canonical_uint_widths() {
    let cases: &[(u64, usize)] = &[
        (9, 1),
        (10, 2),
        (255, 2),
        (256, 3),
        (u64::MAX, 9),
    ];
    for &(v, expected) in cases {
        let mut b = Builder::new();
        b.add(v).unwrap();
        assert_eq!(b.size().unwrap(), expected, "encoding {}", v);
        assert_eq!(b.slice().unwrap().to_u64().unwrap(), v);
    }
}

#[test]
fn eight_byte_int_has_int_type_byte() {
    let mut b = Builder::new();
    b.add(i64::MIN).unwrap();
    assert_eq!(b.data()[0], 0x27);

    let mut b = Builder::new();
    b.add(u64::MAX).unwrap();
    assert_eq!(b.data()[0], 0x2f);
}
