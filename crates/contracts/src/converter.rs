//! MessageConverter trait - domain record to wire message
//!
//! Defines the abstract interface the dispatcher worker calls for every record.

use crate::{ContractError, ConvertedMessage};

/// Record conversion trait
///
/// Implementations decide which stream a record belongs to. Returning
/// `ConvertedMessage::Unsupported` is not an error: the worker logs and drops
/// the record.
#[trait_variant::make(MessageConverter: Send)]
pub trait LocalMessageConverter<R> {
    /// Convert one record
    ///
    /// # Errors
    /// Returns a conversion error if the record is malformed
    async fn convert(&self, record: R) -> Result<ConvertedMessage<R>, ContractError>;
}
