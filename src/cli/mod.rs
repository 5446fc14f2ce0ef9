//! CLI command implementations.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `create` | Register an endpoint and print its secret |
//! | `list` / `show` | Inspect endpoints |
//! | `disable` / `enable` | Toggle an endpoint |
//! | `rotate-secret` | Replace an endpoint's signing secret |
//! | `deliver` | Deliver one event to an endpoint |
//! | `test` | Send a test event without recording it |
//! | `retry` | Retry a delivery now |
//! | `history` / `stats` | Inspect the attempt log |
//! | `purge` | Delete old finished deliveries |
//! | `sign` / `verify` | Compute or check a payload signature |
//! | `worker` | Run the background delivery worker |
//!
//! # Example Usage
//!
//! ```bash
//! webhook-engine create https://billing.example.com/hooks --events invoice.created
//! webhook-engine deliver <WEBHOOK_ID> invoice.created --data '{"invoiceId":"INV-001"}'
//! webhook-engine worker
//! ```

mod webhook;

pub use webhook::{
    OutputFormat, cmd_webhook_create, cmd_webhook_deliver, cmd_webhook_history, cmd_webhook_list,
    cmd_webhook_purge, cmd_webhook_retry, cmd_webhook_rotate_secret, cmd_webhook_set_active,
    cmd_webhook_show, cmd_webhook_sign, cmd_webhook_stats, cmd_webhook_test, cmd_webhook_verify,
    print_tick_report,
};
