use crate::fanout::{EmailSender, PushMessage, PushSender};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct TestSender(Arc<Mutex<TestSenderInner>>);

#[derive(Debug)]
struct TestSenderInner {
    fail_next: usize,
    fail_for: BTreeSet<String>,
    attempts: usize,
    sent: Vec<notifications::NotificationEmail>,
}

impl TestSender {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(TestSenderInner {
            fail_next: 0,
            fail_for: BTreeSet::new(),
            attempts: 0,
            sent: Vec::new(),
        })))
    }

    pub async fn take_sent(&self) -> Vec<notifications::NotificationEmail> {
        let mut lock = self.0.lock().await;
        std::mem::take(&mut lock.sent)
    }

    /// Fails the next `n` sends, regardless of recipient.
    pub async fn fail_next(&self, n: usize) {
        self.0.lock().await.fail_next = n;
    }

    /// Fails every send to `address`.
    pub async fn fail_for(&self, address: &str) {
        self.0.lock().await.fail_for.insert(address.to_string());
    }

    /// Number of sends attempted so far, including failed ones.
    pub async fn attempts(&self) -> usize {
        self.0.lock().await.attempts
    }
}

impl EmailSender for TestSender {
    async fn send<'s>(
        &'s self,
        notification: notifications::NotificationEmail,
    ) -> anyhow::Result<()> {
        let mut lock = self.0.lock().await;
        lock.attempts += 1;
        if lock.fail_next > 0 {
            lock.fail_next -= 1;
            anyhow::bail!(
                "mock error sending alert email '{}'",
                notification.idempotency_key
            );
        }
        if lock.fail_for.contains(&notification.recipient.email) {
            anyhow::bail!("mock error: mailbox {} is unavailable", notification.recipient.email);
        }
        lock.sent.push(notification);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TestPusher(Arc<Mutex<TestPusherInner>>);

#[derive(Debug, Default)]
struct TestPusherInner {
    fail_for: BTreeSet<String>,
    sent: Vec<PushMessage>,
}

impl TestPusher {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(TestPusherInner::default())))
    }

    pub async fn take_sent(&self) -> Vec<PushMessage> {
        let mut lock = self.0.lock().await;
        std::mem::take(&mut lock.sent)
    }

    /// Fails every push to the device `token`.
    pub async fn fail_for(&self, token: &str) {
        self.0.lock().await.fail_for.insert(token.to_string());
    }
}

impl PushSender for TestPusher {
    async fn push<'s>(&'s self, message: PushMessage) -> anyhow::Result<()> {
        let mut lock = self.0.lock().await;
        if lock.fail_for.contains(&message.to) {
            anyhow::bail!("mock error: device {} is not registered", message.to);
        }
        lock.sent.push(message);
        Ok(())
    }
}
