//! Alerts sent to people: low stock to operations, order updates to
//! customers.

use async_trait::async_trait;
use event_bus::{Delivery, HandlerError, LowStockNotification, MessageHandler, OrderNotice};

use crate::NotifyError;

/// Delivers a message to a person.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Notifier that writes every message to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!(to, subject, body, "notification sent");
        Ok(())
    }
}

/// Consumes `low-stock-notifications` and alerts a fixed recipient.
pub struct LowStockNotifier<N> {
    notifier: N,
    recipient: String,
}

impl<N: Notifier> LowStockNotifier<N> {
    pub fn new(notifier: N, recipient: impl Into<String>) -> Self {
        Self {
            notifier,
            recipient: recipient.into(),
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}

/// Subject and body of the alert for a notification.
pub fn render(notification: &LowStockNotification) -> (String, String) {
    let subject = format!("Low stock: product {}", notification.product_id);
    let body = format!(
        "Product {} is down to {} units (threshold {}). Please restock.",
        notification.product_id, notification.quantity, notification.low_stock_threshold
    );
    (subject, body)
}

#[async_trait]
impl<N: Notifier> MessageHandler for LowStockNotifier<N> {
    fn name(&self) -> &str {
        "low-stock-notifier"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let notification: LowStockNotification = delivery.decode()?;
        let (subject, body) = render(&notification);

        self.notifier
            .send(&self.recipient, &subject, &body)
            .await
            .map_err(|e| HandlerError::transient(e.to_string()))
    }
}

/// Consumes `order-notifications` and tells the customer about their order.
///
/// Customers are addressed by id; resolving an id to a mailbox is the
/// [`Notifier`]'s job.
pub struct OrderNotifier<N> {
    notifier: N,
}

impl<N: Notifier> OrderNotifier<N> {
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }
}

/// Subject and body of the customer message for a notice, or `None` for a
/// status customers are not told about.
pub fn render_notice(notice: &OrderNotice) -> Option<(String, String)> {
    let verb = match notice.status.as_str() {
        "Shipped" => "shipped",
        "Cancelled" => "cancelled",
        _ => return None,
    };
    Some((
        format!("Order {} {verb}", notice.order_id),
        format!("Your order {} has been {verb}.", notice.order_id),
    ))
}

#[async_trait]
impl<N: Notifier> MessageHandler for OrderNotifier<N> {
    fn name(&self) -> &str {
        "order-notifier"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let notice: OrderNotice = delivery.decode()?;
        let (subject, body) = render_notice(&notice).ok_or_else(|| {
            HandlerError::malformed(format!(
                "no customer message for order status {:?}",
                notice.status
            ))
        })?;

        self.notifier
            .send(&format!("customer-{}", notice.customer_id), &subject, &body)
            .await
            .map_err(|e| HandlerError::transient(e.to_string()))
    }
}
