// Carts, pricing and the payment orchestrator
pub mod commerce;

// Order placement guard
pub mod idempotency;

// Order lifecycle table and transitions
pub mod order_status;

// Order reads and human-initiated status changes
pub mod orders;
