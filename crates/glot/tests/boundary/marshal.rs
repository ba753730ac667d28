use anyhow::{Context as _, Result};
use glot::Error;

use super::common::{fixture, tear_down};

#[test]
fn integer_round_trips_for_every_width() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;

    for input in [i64::from(i8::MIN), 0, i64::from(i8::MAX)] {
        let value = context.int(input).context("create")?;
        assert_eq!(i64::from(value.as_i8().context("as i8")?), input);
    }
    for input in [i64::from(i16::MIN), -300, i64::from(i16::MAX)] {
        let value = context.int(input).context("create")?;
        assert_eq!(i64::from(value.as_i16().context("as i16")?), input);
    }
    for input in [i64::from(i32::MIN), 123_456, i64::from(i32::MAX)] {
        let value = context.int(input).context("create")?;
        assert_eq!(i64::from(value.as_i32().context("as i32")?), input);
    }
    for input in [i64::MIN, -1, i64::MAX] {
        let value = context.int(input).context("create")?;
        assert_eq!(value.as_i64().context("as i64")?, input);
    }
    for input in [0_u64, u64::from(u8::MAX)] {
        let value = context.int(i64::try_from(input).expect("fits"))?;
        assert_eq!(u64::from(value.as_u8().context("as u8")?), input);
    }
    for input in [0_u64, u64::from(u16::MAX)] {
        let value = context.int(i64::try_from(input).expect("fits"))?;
        assert_eq!(u64::from(value.as_u16().context("as u16")?), input);
    }
    for input in [0_u64, u64::from(u32::MAX)] {
        let value = context.int(i64::try_from(input).expect("fits"))?;
        assert_eq!(u64::from(value.as_u32().context("as u32")?), input);
    }
    tear_down(&thread)
}

#[test]
fn narrowing_conversions_fail_instead_of_truncating() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let value = context.int(300).context("create")?;
    assert!(matches!(value.as_i8(), Err(Error::Conversion(_))));
    assert!(matches!(value.as_u8(), Err(Error::Conversion(_))));
    assert_eq!(value.as_i16().context("as i16")?, 300);

    let negative = context.int(-1).context("create")?;
    assert!(matches!(negative.as_u32(), Err(Error::Conversion(_))));

    let fractional = context.float64(1.5).context("create")?;
    assert!(matches!(fractional.as_i32(), Err(Error::Conversion(_))));
    assert!((fractional.as_f64().context("as f64")? - 1.5).abs() < f64::EPSILON);
    tear_down(&thread)
}

#[test]
fn fitting_predicates_match_the_extractors() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let value = context.int(128).context("create")?;
    assert!(!value.fits_in_i8().context("fits i8")?);
    assert!(value.fits_in_u8().context("fits u8")?);
    assert!(value.fits_in_i16().context("fits i16")?);

    let whole = context.float64(42.0).context("create")?;
    assert!(whole.fits_in_i32().context("fits i32")?);
    assert_eq!(whole.as_i32().context("as i32")?, 42);

    let boolean = context.boolean(true).context("create")?;
    assert!(!boolean.fits_in_i32().context("fits i32")?);
    assert!(matches!(boolean.as_i32(), Err(Error::Conversion(_))));
    assert!(boolean.as_boolean().context("as boolean")?);
    tear_down(&thread)
}

#[test]
fn type_predicates_discover_capabilities() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;

    let null = context.null().context("null")?;
    assert!(null.is_null().context("is null")?);
    assert!(!null.is_number().context("is number")?);

    let text = context.string("hi").context("string")?;
    assert!(text.is_string().context("is string")?);
    assert!(!text.has_members().context("has members")?);
    assert!(!text.can_execute().context("can execute")?);

    let object = context.object().context("object")?;
    assert!(object.has_members().context("has members")?);
    assert!(!object.has_array_elements().context("has array")?);
    tear_down(&thread)
}

#[test]
fn string_extraction_is_string_only() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let text = context.string("grüße").context("string")?;
    assert_eq!(text.as_string().context("as string")?, "grüße");
    assert_eq!(text.to_display_string().context("display")?, "grüße");

    let number = context.int(7).context("number")?;
    assert!(matches!(number.as_string(), Err(Error::StringExpected)));
    assert_eq!(number.to_display_string().context("display")?, "7");
    tear_down(&thread)
}

#[test]
fn member_access_on_objects() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let object = context.object().context("object")?;
    assert!(!object.has_member(&thread, "answer").context("has")?);

    object
        .put_member(&thread, "answer", context.int(42).context("value")?)
        .context("put")?;
    assert!(object.has_member(&thread, "answer").context("has")?);
    let member = object.get_member(&thread, "answer").context("get")?;
    assert_eq!(member.as_i32().context("as i32")?, 42);

    // A missing member reads as the null value.
    let missing = object.get_member(&thread, "nothing").context("get")?;
    assert!(missing.is_null().context("is null")?);

    // Member operations on a memberless value fail generically.
    let number = context.int(1).context("number")?;
    assert!(matches!(
        number.put_member(&thread, "k", context.null().context("null")?),
        Err(Error::Unsupported(_))
    ));
    tear_down(&thread)
}

#[test]
fn array_operations_distinguish_not_an_array_from_out_of_bounds() -> Result<()> {
    let (_isolate, thread, context) = fixture()?;
    let elements = [
        context.int(1).context("value")?,
        context.int(2).context("value")?,
        context.int(3).context("value")?,
    ];
    let array = context.array(&elements).context("array")?;

    assert!(array.has_array_elements().context("has array")?);
    assert_eq!(array.get_array_size(&thread).context("size")?, 3);
    assert_eq!(
        array
            .get_array_element(&thread, 1)
            .context("get")?
            .as_i32()
            .context("as i32")?,
        2
    );

    // Out of bounds is a generic failure, not a crash.
    assert!(matches!(
        array.get_array_element(&thread, 5),
        Err(Error::IndexOutOfBounds(5))
    ));
    assert!(matches!(
        array.get_array_element(&thread, -1),
        Err(Error::IndexOutOfBounds(-1))
    ));

    array
        .set_array_element(&thread, 0, context.int(9).context("value")?)
        .context("set")?;
    assert_eq!(
        array
            .get_array_element(&thread, 0)
            .context("get")?
            .as_i32()
            .context("as i32")?,
        9
    );

    array.remove_array_element(&thread, 0).context("remove")?;
    assert_eq!(array.get_array_size(&thread).context("size")?, 2);
    assert_eq!(
        array
            .get_array_element(&thread, 0)
            .context("get")?
            .as_i32()
            .context("as i32")?,
        2
    );

    // Array operations on non-arrays report the distinguished condition.
    let number = context.int(5).context("number")?;
    assert!(matches!(
        number.get_array_size(&thread),
        Err(Error::ArrayExpected)
    ));
    assert!(matches!(
        number.get_array_element(&thread, 0),
        Err(Error::ArrayExpected)
    ));
    tear_down(&thread)
}
