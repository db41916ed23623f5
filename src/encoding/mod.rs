// Record serialization.
//
// A record is a sequence of fields. Each field is written with every 0x00
// byte escaped as 0x00 0xff, and fields are separated by 0x00 0x01, so the
// separator can never appear inside a field. Records themselves carry no
// framing at all: stores find record boundaries through their offset index.

use anyhow::bail;
use serde::{de::DeserializeOwned, Serialize};

const SEPARATOR: [u8; 2] = [0x00, 0x01];
const ESCAPED_00: [u8; 2] = [0x00, 0xff];

fn copy_escaped(mut from: &[u8], to: &mut Vec<u8>) {
    while !from.is_empty() {
        match from.iter().position(|x| *x == 0x00) {
            Some(idx) => {
                to.extend(&from[..idx + 1]);
                to.push(0xff);
                from = &from[(idx + 1)..];
            }
            None => {
                to.extend(from);
                return;
            }
        }
    }
}

fn copy_unescaped(mut from: &[u8], to: &mut Vec<u8>) {
    while !from.is_empty() {
        match from.windows(2).position(|w| w == ESCAPED_00) {
            Some(idx) => {
                to.extend(&from[..idx + 1]);
                from = &from[(idx + 2)..];
            }
            None => {
                to.extend(from);
                return;
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct KeyWriter {
    pub(crate) buf: Vec<u8>,
}

impl KeyWriter {
    pub fn new() -> Self {
        KeyWriter { buf: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.buf.clear()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn replace(&mut self, mut v: Vec<u8>) -> Vec<u8> {
        std::mem::swap(&mut v, &mut self.buf);
        v
    }

    pub fn write(&mut self, buf: &[u8]) {
        copy_escaped(buf, &mut self.buf);
    }

    pub fn separator(&mut self) {
        self.buf.extend(SEPARATOR);
    }
}

#[derive(Debug, Default)]
pub struct KeyReader {
    buf: Vec<u8>,
    from: usize,
    scratch: Vec<u8>,
}

impl KeyReader {
    pub fn new() -> Self {
        KeyReader {
            buf: Vec::new(),
            from: 0,
            scratch: Vec::new(),
        }
    }

    pub fn load(&mut self, buf: &[u8]) {
        self.buf.clear();
        self.buf.extend(buf);
        self.from = 0;
        self.scratch.clear();
    }

    /// Returns the next unescaped field. Past the end of the record this is
    /// an empty slice.
    pub fn next(&mut self) -> &[u8] {
        self.scratch.clear();
        if self.from >= self.buf.len() {
            self.from = self.buf.len() + SEPARATOR.len();
            return &self.scratch;
        }

        let split_position = self.buf[self.from..]
            .windows(2)
            .position(|x| x == SEPARATOR)
            .unwrap_or(self.buf.len() - self.from);

        copy_unescaped(
            &self.buf[self.from..self.from + split_position],
            &mut self.scratch,
        );
        self.from += split_position + SEPARATOR.len();

        &self.scratch
    }
}

pub trait Encode: std::fmt::Debug {
    fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()>;
}

pub trait Decode: Sized {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self>;
}

/// Anything a set can hold.
pub trait Item: Encode + Decode + Clone + 'static {}

impl<T> Item for T where T: Encode + Decode + Clone + 'static {}

/// The byte image of a single record. Membership tests compare these.
pub fn encode_to_vec<E: Encode + ?Sized>(e: &E) -> anyhow::Result<Vec<u8>> {
    let mut kw = KeyWriter::new();
    e.write_bytes(&mut kw)?;
    Ok(kw.replace(Vec::new()))
}

pub fn decode_from_slice<D: Decode>(buf: &[u8]) -> anyhow::Result<D> {
    let mut kr = KeyReader::new();
    kr.load(buf);
    D::decode(&mut kr)
}

macro_rules! fixed_width {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()> {
                    kw.write(&self.to_le_bytes());
                    Ok(())
                }
            }

            impl Decode for $t {
                fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
                    Ok(Self::from_le_bytes(kr.next().try_into()?))
                }
            }
        )*
    };
}

fixed_width!(u8, u16, u32, u64, usize, i8, i16, i32, i64);

impl Encode for bool {
    fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()> {
        kw.write(&[*self as u8]);
        Ok(())
    }
}

impl Decode for bool {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let tag = match kr.next() {
            [t] => Some(*t),
            _ => None,
        };
        match tag {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            other => bail!("invalid bool encoding {:?}", other),
        }
    }
}

impl Encode for String {
    fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()> {
        kw.write(self.as_bytes());
        Ok(())
    }
}

impl Encode for str {
    fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()> {
        kw.write(self.as_bytes());
        Ok(())
    }
}

impl Decode for String {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let result = String::from_utf8(kr.next().to_vec())?;
        Ok(result)
    }
}

impl<A> Encode for &A
where
    A: Encode + ?Sized,
{
    fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()> {
        (*self).write_bytes(kw)
    }
}

impl<A: Encode> Encode for Vec<A> {
    fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()> {
        self.len().write_bytes(kw)?;
        for v in self {
            kw.separator();
            v.write_bytes(kw)?;
        }
        Ok(())
    }
}

impl<A: Decode> Decode for Vec<A> {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let len = usize::decode(kr)?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(A::decode(kr)?);
        }
        Ok(out)
    }
}

impl<A, B> Encode for (A, B)
where
    A: Encode,
    B: Encode,
{
    fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()> {
        self.0.write_bytes(kw)?;
        kw.separator();
        self.1.write_bytes(kw)
    }
}

impl<A, B> Decode for (A, B)
where
    A: Decode,
    B: Decode,
{
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let a = A::decode(kr)?;
        let b = B::decode(kr)?;
        Ok((a, b))
    }
}

impl<A, B, C> Encode for (A, B, C)
where
    A: Encode,
    B: Encode,
    C: Encode,
{
    fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()> {
        self.0.write_bytes(kw)?;
        kw.separator();
        self.1.write_bytes(kw)?;
        kw.separator();
        self.2.write_bytes(kw)
    }
}

impl<A, B, C> Decode for (A, B, C)
where
    A: Decode,
    B: Decode,
    C: Decode,
{
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let a = A::decode(kr)?;
        let b = B::decode(kr)?;
        let c = C::decode(kr)?;
        Ok((a, b, c))
    }
}

impl<A> Encode for Option<A>
where
    A: Encode,
{
    fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()> {
        match self {
            None => {
                kw.write(&[0]);
                Ok(())
            }
            Some(v) => {
                kw.write(&[1]);
                kw.separator();
                v.write_bytes(kw)
            }
        }
    }
}

impl<A> Decode for Option<A>
where
    A: Decode,
{
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let tag = match kr.next() {
            [t] => Some(*t),
            _ => None,
        };
        match tag {
            Some(0) => Ok(None),
            Some(1) => Ok(Some(A::decode(kr)?)),
            other => bail!("invalid option tag {:?}", other),
        }
    }
}

/// Stores any serde type as a single JSON field.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Json<T>(pub T);

impl<T> Encode for Json<T>
where
    T: Serialize + std::fmt::Debug,
{
    fn write_bytes(&self, kw: &mut KeyWriter) -> anyhow::Result<()> {
        kw.write(&serde_json::to_vec(&self.0)?);
        Ok(())
    }
}

impl<T> Decode for Json<T>
where
    T: DeserializeOwned,
{
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        Ok(Json(serde_json::from_slice(kr.next())?))
    }
}

#[cfg(test)]
mod test {
    use serde::{Deserialize, Serialize};

    use super::{copy_escaped, copy_unescaped, decode_from_slice, encode_to_vec, Json};

    #[test]
    fn test_escaping() {
        for str in [
            vec![0x00_u8, 0x00, 0x01, 0x02, 0x00],
            vec![0x01, 0x01, 0x00],
            vec![0x00, 0xff, 0xff],
            vec![],
        ] {
            let mut out = Vec::new();
            copy_escaped(&str, &mut out);
            assert!(!out.windows(2).any(|w| w == [0x00, 0x01]));
            let mut out2 = Vec::new();
            copy_unescaped(&out, &mut out2);
            assert_eq!(str, out2);
        }
    }

    #[test]
    fn test_composite_records() {
        let v: (u32, Option<String>, Vec<i64>) =
            (0, Some("a\0b".to_owned()), vec![-1, 0, 256]);
        let bytes = encode_to_vec(&v).unwrap();
        let back: (u32, Option<String>, Vec<i64>) = decode_from_slice(&bytes).unwrap();
        assert_eq!(v, back);

        let v: (Vec<u8>, Option<u32>, bool) = (vec![], None, true);
        let back: (Vec<u8>, Option<u32>, bool) =
            decode_from_slice(&encode_to_vec(&v).unwrap()).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn test_json_field() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Row {
            id: u64,
            name: String,
        }

        let row = (
            7_u32,
            Json(Row {
                id: 3,
                name: "ada".into(),
            }),
        );
        let back: (u32, Json<Row>) = decode_from_slice(&encode_to_vec(&row).unwrap()).unwrap();
        assert_eq!(row, back);
    }

    #[test]
    fn test_short_record_is_an_error() {
        let bytes = encode_to_vec(&1_u8).unwrap();
        assert!(decode_from_slice::<(u8, u32)>(&bytes).is_err());
    }
}
