//! Wire framing for work-order broadcasts.
//!
//! A frame is a varint length prefix followed by an encoded `OrderBroadcast`.
//! Decoding validates the whole frame before anything is acted on.

use bytes::{Buf, Bytes};
use prost::Message;

use super::{DispatchError, Result};
use crate::order::{DispatchMessage, OrderClass, WorkItem};
use crate::proto::{OrderBroadcast, WorkItem as WireWorkItem};

/// Encode a dispatch message as a length-delimited frame.
pub fn encode_broadcast(message: &DispatchMessage) -> Result<Bytes> {
    let items = message
        .items
        .iter()
        .map(|item| {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                DispatchError::MalformedFrame(format!(
                    "quantity {} for {} does not fit the wire type",
                    item.quantity, item.sku
                ))
            })?;
            Ok(WireWorkItem {
                sku: item.sku.clone(),
                quantity,
                aisle: item.aisle.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let wire = OrderBroadcast {
        order_id: message.order_id.clone(),
        order_type: message.class.as_str().to_string(),
        items,
    };

    Ok(Bytes::from(wire.encode_length_delimited_to_vec()))
}

/// Decode a frame, rejecting truncated frames and trailing bytes.
pub fn decode_broadcast(frame: &[u8]) -> Result<DispatchMessage> {
    let mut buf = frame;
    let len = prost::decode_length_delimiter(&mut buf)?;
    if buf.remaining() < len {
        return Err(DispatchError::MalformedFrame(format!(
            "truncated frame: declared {} bytes, {} present",
            len,
            buf.remaining()
        )));
    }
    if buf.remaining() > len {
        return Err(DispatchError::MalformedFrame(format!(
            "{} trailing bytes after frame",
            buf.remaining() - len
        )));
    }

    let wire = OrderBroadcast::decode(buf)?;

    if wire.order_id.is_empty() {
        return Err(DispatchError::MalformedFrame("empty order id".to_string()));
    }
    let class: OrderClass = wire.order_type.parse()?;

    let items = wire
        .items
        .into_iter()
        .map(|item| {
            let quantity = u32::try_from(item.quantity).map_err(|_| {
                DispatchError::MalformedFrame(format!(
                    "negative quantity {} for {}",
                    item.quantity, item.sku
                ))
            })?;
            Ok(WorkItem {
                sku: item.sku,
                quantity,
                aisle: item.aisle,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DispatchMessage {
        order_id: wire.order_id,
        class,
        items,
    })
}
