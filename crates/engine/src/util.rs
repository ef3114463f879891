//! Small helpers shared by the runners.

use common::epoch_ms;
use model::OrderSide;

/// New client order id: `<botTag>-<epoch_ms>-<side tag>-<rand>`.
pub(crate) fn new_client_order_id(bot_tag: &str, side: OrderSide) -> String {
    let nonce: u16 = rand::random();
    format!("{}-{}-{}-{:04x}", bot_tag, epoch_ms(), side.tag(), nonce)
}

/// Whether a client order id belongs to the bot with `bot_tag`.
pub(crate) fn is_tagged(client_order_id: &str, bot_tag: &str) -> bool {
    client_order_id
        .strip_prefix(bot_tag)
        .is_some_and(|rest| rest.starts_with('-'))
}
