//! Greedy size-bounded batching of encoded items.

use tracing::warn;

use crate::bail;
use crate::error::{ErrorKind, TransferResult};

/// What [`by_size`] does with an item that does not fit in an empty batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OversizedItemPolicy {
    /// Abort with [`ErrorKind::BatchItemTooLarge`].
    #[default]
    Fail,
    /// Log a warning and drop the item.
    Skip,
}

/// Splits `items` into consecutive batches whose encoded size is at most `max_size_bytes`.
///
/// A batch is handed to `yield_batch` as soon as the next item would push it over the limit.
/// An item that lands exactly on the limit stays in the batch. Empty batches are never
/// yielded. `yield_batch` receives the encoded items together with the items themselves,
/// and its errors are returned unchanged.
pub fn by_size<T, E, Y>(
    items: impl IntoIterator<Item = T>,
    max_size_bytes: usize,
    policy: OversizedItemPolicy,
    mut encode: E,
    mut yield_batch: Y,
) -> TransferResult<()>
where
    E: FnMut(&T) -> TransferResult<Vec<u8>>,
    Y: FnMut(Vec<Vec<u8>>, Vec<T>) -> TransferResult<()>,
{
    let mut encoded_batch = Vec::new();
    let mut item_batch = Vec::new();
    let mut batch_size = 0usize;

    for (index, item) in items.into_iter().enumerate() {
        let encoded = match encode(&item) {
            Ok(encoded) => encoded,
            Err(err) => {
                bail!(
                    ErrorKind::BatchEncodeFailed,
                    "Failed to encode batch item",
                    format!("failed to encode item {index}: {err}"),
                    source: err
                );
            }
        };

        if encoded.len() > max_size_bytes {
            match policy {
                OversizedItemPolicy::Fail => {
                    bail!(
                        ErrorKind::BatchItemTooLarge,
                        "Batch item exceeds the maximum batch size",
                        format!(
                            "item {index} is larger ({} bytes) than max size ({max_size_bytes} bytes)",
                            encoded.len()
                        )
                    );
                }
                OversizedItemPolicy::Skip => {
                    warn!(
                        index,
                        size = encoded.len(),
                        max_size_bytes,
                        "skipping item that is larger than the maximum batch size"
                    );
                    continue;
                }
            }
        }

        if batch_size + encoded.len() > max_size_bytes {
            yield_batch(
                std::mem::take(&mut encoded_batch),
                std::mem::take(&mut item_batch),
            )?;
            batch_size = 0;
        }

        batch_size += encoded.len();
        encoded_batch.push(encoded);
        item_batch.push(item);
    }

    if !encoded_batch.is_empty() {
        yield_batch(encoded_batch, item_batch)?;
    }

    Ok(())
}
