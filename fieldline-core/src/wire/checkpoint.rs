use super::buffer::{WireBuffer, WireError};
use super::format::WireFormat;

/// Specifies if a [StateVisitor] writes values into or reads values from its buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointDirection {
    /// Values are written to the buffer.
    Save,
    /// Values are overwritten by what is read from the buffer.
    Restore,
}

/// Walks over the fields offered by a [StateCheckpoint] and either saves or restores them.
///
/// Since saving and restoring traverse the fields in exactly the same order,
/// a single implementation of [StateCheckpoint::offer_fields] defines the binary layout for
/// both directions.
pub struct StateVisitor<'a> {
    buffer: &'a mut WireBuffer,
    direction: CheckpointDirection,
    n_fields: usize,
}

impl<'a> StateVisitor<'a> {
    /// Visitor which writes all offered fields to the buffer.
    pub fn save(buffer: &'a mut WireBuffer) -> Self {
        Self {
            buffer,
            direction: CheckpointDirection::Save,
            n_fields: 0,
        }
    }

    /// Visitor which reads all offered fields from the buffer.
    pub fn restore(buffer: &'a mut WireBuffer) -> Self {
        Self {
            buffer,
            direction: CheckpointDirection::Restore,
            n_fields: 0,
        }
    }

    /// Direction in which this visitor transfers values.
    pub fn direction(&self) -> CheckpointDirection {
        self.direction
    }

    /// Number of fields which were visited so far.
    pub fn n_fields(&self) -> usize {
        self.n_fields
    }

    /// Saves or restores a single field.
    pub fn accept<T>(&mut self, value: &mut T) -> Result<(), WireError>
    where
        T: WireFormat,
    {
        match self.direction {
            CheckpointDirection::Save => self.buffer.write(value),
            CheckpointDirection::Restore => self.buffer.read_into(value)?,
        }
        self.n_fields += 1;
        Ok(())
    }
}

/// Exposes the persistent state of an object field by field.
///
/// ```
/// # use fieldline_core::wire::*;
/// #[derive(Default)]
/// struct Counter {
///     count: u64,
///     last: Option<f64>,
/// }
///
/// impl StateCheckpoint for Counter {
///     fn offer_fields(&mut self, visitor: &mut StateVisitor) -> Result<(), WireError> {
///         visitor.accept(&mut self.count)?;
///         visitor.accept(&mut self.last)
///     }
/// }
///
/// let mut counter = Counter { count: 3, last: Some(1.5) };
/// let mut buffer = WireBuffer::new();
/// counter.save(&mut buffer).unwrap();
///
/// let mut restored = Counter::default();
/// buffer.rewind();
/// restored.restore(&mut buffer).unwrap();
/// assert_eq!(restored.count, 3);
/// assert_eq!(restored.last, Some(1.5));
/// ```
pub trait StateCheckpoint {
    /// Offers every persistent field to the visitor in a fixed order.
    fn offer_fields(&mut self, visitor: &mut StateVisitor) -> Result<(), WireError>;

    /// Writes all fields to the buffer.
    fn save(&mut self, buffer: &mut WireBuffer) -> Result<(), WireError> {
        self.offer_fields(&mut StateVisitor::save(buffer))
    }

    /// Overwrites all fields with values read from the buffer.
    fn restore(&mut self, buffer: &mut WireBuffer) -> Result<(), WireError> {
        self.offer_fields(&mut StateVisitor::restore(buffer))
    }
}
