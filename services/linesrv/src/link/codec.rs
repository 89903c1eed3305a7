//! Register codec
//!
//! Maps typed values onto the two primitive shapes a transport offers: a single
//! bit or a run of 16-bit words. Multi-word values use big-endian word order
//! with big-endian bytes in each word (ABCD).

/// How a value is laid out on the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Bit,
    Words(u16),
}

/// Raw transport value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Bit(bool),
    Words(Vec<u16>),
}

/// A value that can be round-tripped through register I/O
pub trait RegisterValue: Sized + Send {
    const SHAPE: Shape;

    fn decode(raw: RawValue) -> Result<Self, String>;

    fn encode(&self) -> RawValue;
}

fn expect_words(raw: RawValue, count: usize) -> Result<Vec<u16>, String> {
    match raw {
        RawValue::Words(words) if words.len() >= count => Ok(words),
        RawValue::Words(words) => Err(format!("need {count} words, got {}", words.len())),
        RawValue::Bit(_) => Err("expected words, got a bit".to_string()),
    }
}

fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

fn bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect()
}

impl RegisterValue for bool {
    const SHAPE: Shape = Shape::Bit;

    fn decode(raw: RawValue) -> Result<Self, String> {
        match raw {
            RawValue::Bit(b) => Ok(b),
            RawValue::Words(_) => Err("expected a bit, got words".to_string()),
        }
    }

    fn encode(&self) -> RawValue {
        RawValue::Bit(*self)
    }
}

macro_rules! impl_integer_value {
    ($($ty:ty => $words:expr),* $(,)?) => {
        $(
            impl RegisterValue for $ty {
                const SHAPE: Shape = Shape::Words($words);

                fn decode(raw: RawValue) -> Result<Self, String> {
                    let words = expect_words(raw, $words)?;
                    let bytes = words_to_bytes(&words[..$words]);
                    let array = bytes
                        .try_into()
                        .map_err(|_| format!("byte length mismatch for {}", stringify!($ty)))?;
                    Ok(<$ty>::from_be_bytes(array))
                }

                fn encode(&self) -> RawValue {
                    RawValue::Words(bytes_to_words(&self.to_be_bytes()))
                }
            }
        )*
    };
}

impl_integer_value!(u16 => 1, i16 => 1, u32 => 2, i32 => 2, u64 => 4, i64 => 4);

impl RegisterValue for f32 {
    const SHAPE: Shape = Shape::Words(2);

    fn decode(raw: RawValue) -> Result<Self, String> {
        let bits = u32::decode(raw)?;
        let value = f32::from_bits(bits);
        if !value.is_finite() {
            return Err(format!("non-finite float32 value {value}"));
        }
        Ok(value)
    }

    fn encode(&self) -> RawValue {
        self.to_bits().encode()
    }
}

impl RegisterValue for f64 {
    const SHAPE: Shape = Shape::Words(4);

    fn decode(raw: RawValue) -> Result<Self, String> {
        let bits = u64::decode(raw)?;
        let value = f64::from_bits(bits);
        if !value.is_finite() {
            return Err(format!("non-finite float64 value {value}"));
        }
        Ok(value)
    }

    fn encode(&self) -> RawValue {
        self.to_bits().encode()
    }
}

/// Number of words needed for a `len`-byte string
pub fn string_words(len: u16) -> u16 {
    len.div_ceil(2)
}

/// Decode bytes packed high-byte-first; stops at the first NUL and trims whitespace.
pub fn decode_string(words: &[u16]) -> String {
    let bytes = words_to_bytes(words);
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Encode into exactly `string_words(len)` words, truncating or NUL-padding.
pub fn encode_string(value: &str, len: u16) -> Vec<u16> {
    let mut bytes: Vec<u8> = value.bytes().take(len as usize).collect();
    bytes.resize(string_words(len) as usize * 2, 0);
    bytes_to_words(&bytes)
}
