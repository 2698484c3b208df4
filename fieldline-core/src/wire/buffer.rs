use std::error::Error;
use std::fmt::Display;
use std::io::Write;

use super::format::WireFormat;

/// Smallest capacity the buffer allocates once it needs to grow.
const MIN_CAPACITY: usize = 64;

/// Errors related to reading from and writing to a [WireBuffer].
///
/// These errors are structural.
/// They indicate that sender and receiver do not agree on the layout of the transmitted data
/// and should never be caught and retried.
#[derive(Debug)]
pub enum WireError {
    /// Attempted to read more bytes than the buffer holds.
    OutOfRange {
        /// Position of the read cursor.
        pos: usize,
        /// Number of bytes which were requested.
        requested: usize,
        /// Length of the buffer.
        len: usize,
    },
    /// Attempted to move the cursor beyond the length of the buffer.
    InvalidPosition {
        /// The requested position.
        requested: usize,
        /// Length of the buffer.
        len: usize,
    },
    /// The bytes could be read but do not represent a valid value.
    InvalidValue(String),
    /// Error related to File Io operations.
    IoError(std::io::Error),
}

impl Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            WireError::OutOfRange {
                pos,
                requested,
                len,
            } => write!(
                f,
                "out of range read of {} bytes at position {} in buffer of length {}",
                requested, pos, len
            ),
            WireError::InvalidPosition { requested, len } => write!(
                f,
                "invalid position {} in buffer of length {}",
                requested, len
            ),
            WireError::InvalidValue(message) => write!(f, "{}", message),
            WireError::IoError(message) => write!(f, "{}", message),
        }
    }
}

impl Error for WireError {}

impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> Self {
        WireError::IoError(err)
    }
}

/// Growable byte buffer with a read/write cursor.
///
/// The buffer stores values in their exact machine-native layout.
/// There is no endianness conversion and no compression.
/// This means that buffers can only be exchanged between machines of identical architecture,
/// which is the usual situation inside a homogeneous compute cluster.
///
/// The buffer upholds `pos <= len <= capacity` at all times.
/// Writing happens at the cursor and advances it, extending the length if necessary.
/// Reading past the length fails with [WireError::OutOfRange].
///
/// ```
/// # use fieldline_core::wire::WireBuffer;
/// let mut buffer = WireBuffer::new();
/// buffer.write(&3_u32);
/// buffer.write(&vec![1.0_f64, 2.0]);
/// buffer.write(&String::from("streamline"));
///
/// buffer.rewind();
/// assert_eq!(buffer.read::<u32>().unwrap(), 3);
/// assert_eq!(buffer.read::<Vec<f64>>().unwrap(), vec![1.0, 2.0]);
/// assert_eq!(buffer.read::<String>().unwrap(), "streamline");
/// assert!(buffer.read::<u8>().is_err());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WireBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl WireBuffer {
    /// Constructs an empty buffer without allocating.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            pos: 0,
        }
    }

    /// Constructs an empty buffer which can hold at least `capacity` bytes without growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Wraps existing bytes. The cursor is placed at the beginning.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes,
            pos: 0,
        }
    }

    /// Number of valid bytes in the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Checks if the buffer contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes the buffer can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Current position of the cursor.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Number of bytes between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Moves the cursor.
    ///
    /// Fails with [WireError::InvalidPosition] if `pos > len`.
    pub fn set_pos(&mut self, pos: usize) -> Result<(), WireError> {
        if pos > self.data.len() {
            return Err(WireError::InvalidPosition {
                requested: pos,
                len: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Moves the cursor back to the beginning of the buffer.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Removes all bytes while keeping the allocated capacity.
    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    /// All valid bytes of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the buffer and returns its valid bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn grow_to(&mut self, required: usize) {
        let capacity = self.data.capacity();
        if required > capacity {
            let new_capacity = required.max(2 * capacity).max(MIN_CAPACITY);
            self.data.reserve_exact(new_capacity - self.data.len());
        }
    }

    /// Writes raw bytes at the cursor and advances it.
    ///
    /// Bytes behind the cursor are overwritten, the buffer is extended if needed.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        self.grow_to(end);
        let n_overwrite = (self.data.len() - self.pos).min(bytes.len());
        self.data[self.pos..self.pos + n_overwrite].copy_from_slice(&bytes[..n_overwrite]);
        self.data.extend_from_slice(&bytes[n_overwrite..]);
        self.pos = end;
    }

    /// Reads `n` raw bytes at the cursor and advances it.
    pub fn read_raw(&mut self, n: usize) -> Result<&[u8], WireError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(WireError::OutOfRange {
                pos: self.pos,
                requested: n,
                len: self.data.len(),
            })?;
        let start = self.pos;
        self.pos = end;
        Ok(&self.data[start..end])
    }

    /// Reads a fixed number of raw bytes.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut bytes = [0_u8; N];
        bytes.copy_from_slice(self.read_raw(N)?);
        Ok(bytes)
    }

    /// Writes the binary representation of a value.
    pub fn write<T>(&mut self, value: &T)
    where
        T: WireFormat,
    {
        value.write_wire(self);
    }

    /// Reads a value which was previously written with [WireBuffer::write].
    pub fn read<T>(&mut self) -> Result<T, WireError>
    where
        T: WireFormat,
    {
        T::read_wire(self)
    }

    /// Reads a value and stores it in the given location.
    ///
    /// The location is left untouched if reading fails.
    pub fn read_into<T>(&mut self, value: &mut T) -> Result<(), WireError>
    where
        T: WireFormat,
    {
        *value = T::read_wire(self)?;
        Ok(())
    }

    /// Writes an opaque blob of bytes prefixed by its length.
    ///
    /// This is used for data whose layout is not known to this crate such as mesh fragments.
    pub fn write_blob(&mut self, blob: &[u8]) {
        self.write(&blob.len());
        self.write_raw(blob);
    }

    /// Reads an opaque blob previously written with [WireBuffer::write_blob].
    pub fn read_blob(&mut self) -> Result<Vec<u8>, WireError> {
        let n = self.read::<usize>()?;
        Ok(self.read_raw(n)?.to_vec())
    }

    /// Stores the valid bytes of the buffer in a file, replacing its previous content.
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), WireError> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(&self.data)?;
        file.flush()?;
        Ok(())
    }

    /// Appends the valid bytes of the buffer to a file, creating it if necessary.
    pub fn append_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), WireError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(&self.data)?;
        file.flush()?;
        Ok(())
    }

    /// Loads a buffer from a file. The cursor is placed at the beginning.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self, WireError> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }
}
