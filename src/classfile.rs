//! Minimal class-file reader.
//!
//! Reads just enough of the JVM class-file layout to recover the declared class
//! name and the type names of its class-level runtime-visible annotations. The
//! constant pool is walked once; fields, methods and their attributes are skipped
//! by length without being interpreted.

use crate::error::MalformedClassError;

pub const MAGIC: u32 = 0xCAFE_BABE;
/// JDK 1.1
pub const MIN_MAJOR_VERSION: u16 = 45;
/// JDK 25
pub const MAX_MAJOR_VERSION: u16 = 69;

const RUNTIME_VISIBLE_ANNOTATIONS: &[u8] = b"RuntimeVisibleAnnotations";
const MAX_ELEMENT_DEPTH: usize = 32;

type Result<T> = std::result::Result<T, MalformedClassError>;

/// Class name plus the annotations declared directly on the class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClass {
    /// Dotted binary name, e.g. `com.app.Foo$Bar`.
    pub name: String,
    /// Dotted annotation type names in declaration order.
    pub annotations: Vec<String>,
}

pub fn parse(bytes: &[u8]) -> Result<ParsedClass> {
    let mut r = Reader::new(bytes);

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(MalformedClassError::BadMagic(magic));
    }
    let minor = r.u16()?;
    let major = r.u16()?;
    if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major) {
        return Err(MalformedClassError::UnsupportedVersion { major, minor });
    }

    let pool = ConstantPool::read(&mut r)?;

    r.skip(2)?; // access_flags
    let this_class = r.u16()?;
    r.skip(2)?; // super_class
    let interfaces = r.u16()? as usize;
    r.skip(interfaces * 2)?;
    skip_members(&mut r)?; // fields
    skip_members(&mut r)?; // methods

    let name = pool.class_name(this_class)?;

    let mut annotations = Vec::new();
    let attributes = r.u16()?;
    for _ in 0..attributes {
        let name_index = r.u16()?;
        let len = r.u32()? as usize;
        let mut body = r.sub(len)?;
        if pool.utf8(name_index)? == RUNTIME_VISIBLE_ANNOTATIONS {
            read_annotation_table(&mut body, &pool, &mut annotations)?;
        }
    }

    Ok(ParsedClass { name, annotations })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let remaining = self.end - self.pos;
        if n > remaining {
            return Err(MalformedClassError::Truncated {
                offset: self.pos,
                needed: n - remaining,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Splits off the next `n` bytes as a bounded reader that keeps absolute offsets.
    fn sub(&mut self, n: usize) -> Result<Reader<'a>> {
        let start = self.pos;
        self.skip(n)?;
        Ok(Reader {
            data: self.data,
            pos: start,
            end: start + n,
        })
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn consumed_since(&self, start: usize) -> usize {
        self.pos - start
    }
}

#[derive(Debug, Clone, Copy)]
enum Constant<'a> {
    Unusable,
    Utf8(&'a [u8]),
    Class { name_index: u16 },
    Other,
}

struct ConstantPool<'a> {
    entries: Vec<Constant<'a>>,
}

impl<'a> ConstantPool<'a> {
    fn read(r: &mut Reader<'a>) -> Result<Self> {
        // u32 so that a two-slot constant in the last slot cannot wrap the index.
        let count = u32::from(r.u16()?);
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(Constant::Unusable);

        let mut index = 1u32;
        while index < count {
            let tag = r.u8()?;
            let constant = match tag {
                1 => {
                    let len = r.u16()? as usize;
                    Constant::Utf8(r.take(len)?)
                }
                7 => Constant::Class {
                    name_index: r.u16()?,
                },
                3 | 4 => {
                    r.skip(4)?;
                    Constant::Other
                }
                5 | 6 => {
                    if index + 1 >= count {
                        return Err(MalformedClassError::BadConstantIndex {
                            index: index as u16,
                            expected: "two-slot Long or Double",
                        });
                    }
                    r.skip(8)?;
                    entries.push(Constant::Other);
                    index += 1;
                    Constant::Unusable
                }
                8 | 16 | 19 | 20 => {
                    r.skip(2)?;
                    Constant::Other
                }
                9 | 10 | 11 | 12 | 17 | 18 => {
                    r.skip(4)?;
                    Constant::Other
                }
                15 => {
                    r.skip(3)?;
                    Constant::Other
                }
                _ => {
                    return Err(MalformedClassError::BadConstantTag {
                        index: index as u16,
                        tag,
                    });
                }
            };
            entries.push(constant);
            index += 1;
        }

        Ok(Self { entries })
    }

    fn utf8(&self, index: u16) -> Result<&'a [u8]> {
        match self.entries.get(index as usize) {
            Some(Constant::Utf8(bytes)) => Ok(*bytes),
            _ => Err(MalformedClassError::BadConstantIndex {
                index,
                expected: "Utf8",
            }),
        }
    }

    fn class_name(&self, index: u16) -> Result<String> {
        match self.entries.get(index as usize) {
            Some(Constant::Class { name_index }) => {
                Ok(decode_modified_utf8(self.utf8(*name_index)?).replace('/', "."))
            }
            _ => Err(MalformedClassError::BadConstantIndex {
                index,
                expected: "Class",
            }),
        }
    }
}

fn skip_members(r: &mut Reader<'_>) -> Result<()> {
    let count = r.u16()?;
    for _ in 0..count {
        r.skip(6)?; // access_flags, name_index, descriptor_index
        skip_attributes(r)?;
    }
    Ok(())
}

fn skip_attributes(r: &mut Reader<'_>) -> Result<()> {
    let count = r.u16()?;
    for _ in 0..count {
        r.skip(2)?;
        let len = r.u32()? as usize;
        r.skip(len)?;
    }
    Ok(())
}

fn read_annotation_table(
    body: &mut Reader<'_>,
    pool: &ConstantPool<'_>,
    out: &mut Vec<String>,
) -> Result<()> {
    let start = body.pos;
    let declared = body.end - body.pos;

    let count = body.u16()?;
    for _ in 0..count {
        let type_index = body.u16()?;
        out.push(descriptor_to_name(pool.utf8(type_index)?));
        skip_element_pairs(body, 0)?;
    }

    let actual = body.consumed_since(start);
    if actual != declared {
        return Err(MalformedClassError::AttributeLength { declared, actual });
    }
    Ok(())
}

fn skip_element_pairs(r: &mut Reader<'_>, depth: usize) -> Result<()> {
    let pairs = r.u16()?;
    for _ in 0..pairs {
        r.skip(2)?; // element_name_index
        skip_element_value(r, depth)?;
    }
    Ok(())
}

fn skip_element_value(r: &mut Reader<'_>, depth: usize) -> Result<()> {
    if depth > MAX_ELEMENT_DEPTH {
        return Err(MalformedClassError::NestingTooDeep(MAX_ELEMENT_DEPTH));
    }
    match r.u8()? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => r.skip(2),
        b'e' => r.skip(4),
        b'@' => {
            r.skip(2)?; // type_index
            skip_element_pairs(r, depth + 1)
        }
        b'[' => {
            let values = r.u16()?;
            for _ in 0..values {
                skip_element_value(r, depth + 1)?;
            }
            Ok(())
        }
        tag => Err(MalformedClassError::BadElementTag(tag)),
    }
}

/// `Ljavax/persistence/Entity;` -> `javax.persistence.Entity`
fn descriptor_to_name(descriptor: &[u8]) -> String {
    let text = decode_modified_utf8(descriptor);
    let trimmed = text
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .unwrap_or(&text);
    trimmed.replace('/', ".")
}

/// Decodes the JVM's modified UTF-8: `C0 80` for NUL, supplementary
/// characters as surrogate pairs of 3-byte sequences.
fn decode_modified_utf8(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let continuation = |k: usize| bytes.get(i + k).filter(|c| *c & 0xC0 == 0x80).copied();
        if b < 0x80 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            match continuation(1) {
                Some(b1) => {
                    units.push(((b as u16 & 0x1F) << 6) | (b1 as u16 & 0x3F));
                    i += 2;
                }
                None => {
                    units.push(char::REPLACEMENT_CHARACTER as u16);
                    i += 1;
                }
            }
        } else if b & 0xF0 == 0xE0 {
            match (continuation(1), continuation(2)) {
                (Some(b1), Some(b2)) => {
                    units.push(
                        ((b as u16 & 0x0F) << 12) | ((b1 as u16 & 0x3F) << 6) | (b2 as u16 & 0x3F),
                    );
                    i += 3;
                }
                _ => {
                    units.push(char::REPLACEMENT_CHARACTER as u16);
                    i += 1;
                }
            }
        } else {
            units.push(char::REPLACEMENT_CHARACTER as u16);
            i += 1;
        }
    }

    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::ClassFileBuilder;
    use super::*;

    #[test]
    fn parse_reads_name_and_visible_annotations() {
        let bytes = ClassFileBuilder::new("com.app.Foo")
            .annotation("javax.persistence.Entity")
            .annotation("javax.persistence.Table")
            .build();

        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.name, "com.app.Foo");
        assert_eq!(
            parsed.annotations,
            vec!["javax.persistence.Entity", "javax.persistence.Table"]
        );
    }

    #[test]
    fn parse_ignores_invisible_annotations() {
        let bytes = ClassFileBuilder::new("com.app.Foo")
            .invisible_annotation("javax.persistence.Entity")
            .build();

        let parsed = parse(&bytes).unwrap();
        assert!(parsed.annotations.is_empty());
    }

    #[test]
    fn parse_skips_nested_element_values() {
        let bytes = ClassFileBuilder::new("com.app.Order")
            .with_element_values()
            .annotation("javax.persistence.Table")
            .annotation("javax.persistence.Entity")
            .build();

        let parsed = parse(&bytes).unwrap();
        assert_eq!(
            parsed.annotations,
            vec!["javax.persistence.Table", "javax.persistence.Entity"]
        );
    }

    #[test]
    fn parse_keeps_inner_class_binary_name() {
        let bytes = ClassFileBuilder::new("com.app.Outer$Inner").build();
        assert_eq!(parse(&bytes).unwrap().name, "com.app.Outer$Inner");
    }

    #[test]
    fn parse_rejects_bad_magic() {
        let mut bytes = ClassFileBuilder::new("a.A").build();
        bytes[0] = 0;
        assert!(matches!(
            parse(&bytes),
            Err(MalformedClassError::BadMagic(0x00FE_BABE))
        ));
    }

    #[test]
    fn parse_rejects_unsupported_versions() {
        for major in [44, MAX_MAJOR_VERSION + 1] {
            let bytes = ClassFileBuilder::new("a.A").major_version(major).build();
            assert!(matches!(
                parse(&bytes),
                Err(MalformedClassError::UnsupportedVersion { .. })
            ));
        }
        let newest = ClassFileBuilder::new("a.A")
            .major_version(MAX_MAJOR_VERSION)
            .build();
        assert!(parse(&newest).is_ok());
    }

    #[test]
    fn parse_rejects_short_header() {
        let err = parse(&[0xCA, 0xFE, 0xBA]).unwrap_err();
        assert_eq!(
            err,
            MalformedClassError::Truncated {
                offset: 0,
                needed: 1
            }
        );
        assert!(matches!(
            parse(&[]),
            Err(MalformedClassError::Truncated { .. })
        ));
    }

    #[test]
    fn parse_rejects_truncated_attribute_table() {
        let bytes = ClassFileBuilder::new("a.A")
            .annotation("javax.persistence.Entity")
            .build();
        for cut in [bytes.len() - 1, bytes.len() - 4, 20] {
            assert!(
                matches!(parse(&bytes[..cut]), Err(MalformedClassError::Truncated { .. })),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn parse_rejects_unknown_constant_tag() {
        let mut bytes = ClassFileBuilder::new("a.A").build();
        // First constant starts right after the 10-byte header.
        bytes[10] = 99;
        assert!(matches!(
            parse(&bytes),
            Err(MalformedClassError::BadConstantTag { index: 1, tag: 99 })
        ));
    }

    /// Pool `#1 "a/A"`, `#2 Class #1`, `#3 "RuntimeVisibleAnnotations"`,
    /// `#4 "Lx/Entity;"`, `#5 "value"`, and one visible annotation attribute
    /// carrying `table` verbatim.
    fn class_with_annotation_table(this_class: u16, table: &[u8]) -> Vec<u8> {
        fn utf8(out: &mut Vec<u8>, text: &str) {
            out.push(1);
            out.extend_from_slice(&(text.len() as u16).to_be_bytes());
            out.extend_from_slice(text.as_bytes());
        }

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, 52]);
        out.extend_from_slice(&6u16.to_be_bytes());
        utf8(&mut out, "a/A");
        out.extend_from_slice(&[7, 0, 1]);
        for text in ["RuntimeVisibleAnnotations", "Lx/Entity;", "value"] {
            utf8(&mut out, text);
        }
        out.extend_from_slice(&[0x00, 0x21]);
        out.extend_from_slice(&this_class.to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]); // super, interfaces, fields, methods
        out.extend_from_slice(&[0, 1, 0, 3]);
        out.extend_from_slice(&(table.len() as u32).to_be_bytes());
        out.extend_from_slice(table);
        out
    }

    /// One `@x.Entity(value = <value>)` annotation.
    fn single_value_table(value: &[u8]) -> Vec<u8> {
        let mut table = vec![0, 1, 0, 4, 0, 1, 0, 5];
        table.extend_from_slice(value);
        table
    }

    #[test]
    fn hand_built_annotation_table_parses() {
        let bytes = class_with_annotation_table(2, &single_value_table(&[b'I', 0, 5]));
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.name, "a.A");
        assert_eq!(parsed.annotations, vec!["x.Entity"]);
    }

    #[test]
    fn parse_rejects_attribute_longer_than_its_table() {
        let bytes = class_with_annotation_table(2, &[0, 1, 0, 4, 0, 0, 0, 0]);
        assert_eq!(
            parse(&bytes),
            Err(MalformedClassError::AttributeLength {
                declared: 8,
                actual: 6
            })
        );
    }

    #[test]
    fn parse_rejects_deeply_nested_element_values() {
        let mut value = Vec::new();
        for _ in 0..34 {
            value.extend_from_slice(&[b'[', 0, 1]);
        }
        value.extend_from_slice(&[b'I', 0, 5]);
        let bytes = class_with_annotation_table(2, &single_value_table(&value));
        assert_eq!(
            parse(&bytes),
            Err(MalformedClassError::NestingTooDeep(MAX_ELEMENT_DEPTH))
        );
    }

    #[test]
    fn parse_rejects_unknown_element_tag() {
        let bytes = class_with_annotation_table(2, &single_value_table(&[b'x', 0, 5]));
        assert_eq!(parse(&bytes), Err(MalformedClassError::BadElementTag(b'x')));
    }

    #[test]
    fn parse_rejects_this_class_pointing_at_utf8() {
        let bytes = class_with_annotation_table(1, &[0, 0]);
        assert_eq!(
            parse(&bytes),
            Err(MalformedClassError::BadConstantIndex {
                index: 1,
                expected: "Class"
            })
        );
    }

    #[test]
    fn parse_rejects_long_in_last_pool_slot() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 52]);
        bytes.extend_from_slice(&u16::MAX.to_be_bytes());
        for _ in 1..65534 {
            bytes.extend_from_slice(&[3, 0, 0, 0, 0]);
        }
        bytes.push(5);
        bytes.extend_from_slice(&[0; 8]);
        bytes.extend_from_slice(&[0; 16]);

        assert_eq!(
            parse(&bytes),
            Err(MalformedClassError::BadConstantIndex {
                index: 65534,
                expected: "two-slot Long or Double"
            })
        );
    }

    #[test]
    fn decode_modified_utf8_handles_nul_and_surrogates() {
        assert_eq!(decode_modified_utf8(&[b'a', 0xC0, 0x80, b'b']), "a\u{0}b");
        // U+1F600 as a CESU-style surrogate pair
        let smiley = [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        assert_eq!(decode_modified_utf8(&smiley), "\u{1F600}");
        assert_eq!(decode_modified_utf8(&[0xFF]), "\u{FFFD}");
    }

    #[test]
    fn descriptor_to_name_strips_reference_form() {
        assert_eq!(
            descriptor_to_name(b"Ljakarta/persistence/Converter;"),
            "jakarta.persistence.Converter"
        );
        assert_eq!(descriptor_to_name(b"odd/Form"), "odd.Form");
    }
}
