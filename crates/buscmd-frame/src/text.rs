/// A bounded, NUL-terminated text field of exactly `N` bytes on the wire.
///
/// At most `N - 1` payload bytes are kept; the rest of the field is zero, so
/// there is always a terminator. Reading stops at the first NUL.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedText<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedText<N> {
    /// Payload capacity (one byte is reserved for the terminator).
    pub const CAPACITY: usize = N - 1;

    /// Copy up to `N - 1` bytes of `data`, stopping early at an embedded NUL.
    pub fn new(data: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        let data = match data.iter().position(|&b| b == 0) {
            Some(end) => &data[..end],
            None => data,
        };
        let len = data.len().min(Self::CAPACITY);
        bytes[..len].copy_from_slice(&data[..len]);
        Self { bytes }
    }

    /// Like [`FixedText::new`] but also reports whether `data` was cut short.
    pub fn truncating(data: &[u8]) -> (Self, bool) {
        let text = Self::new(data);
        let kept = text.len();
        let wanted = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        (text, kept < wanted)
    }

    /// Rebuild from the raw field as it appears on the wire.
    ///
    /// The last byte is forced to NUL so the terminator guarantee holds even
    /// for a peer that filled the whole field.
    pub fn from_wire(raw: &[u8; N]) -> Self {
        Self::new(raw)
    }

    /// The payload bytes, up to (not including) the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    /// The full field, terminator and padding included.
    pub fn as_wire(&self) -> &[u8; N] {
        &self.bytes
    }

    /// Number of payload bytes.
    pub fn len(&self) -> usize {
        self.bytes.iter().position(|&b| b == 0).unwrap_or(N)
    }

    /// True if there are no payload bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload as text, replacing invalid UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl<const N: usize> Default for FixedText<N> {
    fn default() -> Self {
        Self { bytes: [0u8; N] }
    }
}

impl<const N: usize> From<&str> for FixedText<N> {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes())
    }
}

impl<const N: usize> std::fmt::Debug for FixedText<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl<const N: usize> std::fmt::Display for FixedText<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}
