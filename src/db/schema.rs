use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Inbound webhook events (idempotency ledger + audit trail)
        -- The UNIQUE constraint on event_id is the deduplication gate:
        -- a redelivery inserts nothing. Rows are write-once and purged
        -- past the retention window.
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL UNIQUE,
            category TEXT CHECK (category IS NULL OR category IN ('payment', 'subscription', 'customer')),
            raw_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            received_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_received ON webhook_events(received_at);

        -- Customer -> user resolution (populated by the checkout flow;
        -- read here to lazily create subscriptions)
        CREATE TABLE IF NOT EXISTS customers (
            customer_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_customers_user ON customers(user_id);

        -- Authoritative subscription records, keyed by provider ID
        CREATE TABLE IF NOT EXISTS subscriptions (
            subscription_id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            plan_id TEXT,
            status TEXT NOT NULL CHECK (status IN ('pending', 'active', 'overdue', 'cancelled', 'expired', 'refunded', 'inactive')),
            last_event_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_customer ON subscriptions(customer_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);

        -- Denormalized projection for entitlement lookups by user.
        -- Eventually consistent with subscriptions.status.
        CREATE TABLE IF NOT EXISTS user_subscriptions (
            subscription_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            status TEXT NOT NULL,
            plan_type TEXT,
            next_due_date TEXT,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_user_subscriptions_user ON user_subscriptions(user_id);
        "#,
    )?;
    Ok(())
}
