use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;

/// Fans any number of unix signals into a single receiver. Each kind is
/// listened to once, re-registering it is a no-op.
pub struct SignalHandler {
    kinds: Vec<SignalKind>,
    signal_send: mpsc::Sender<SignalKind>,
    signal_recv: mpsc::Receiver<SignalKind>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        let (signal_send, signal_recv) = mpsc::channel(1);
        Self {
            kinds: Vec::new(),
            signal_send,
            signal_recv,
        }
    }
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signal(mut self, kind: SignalKind) -> Self {
        if self.kinds.contains(&kind) {
            return self;
        }

        let mut signal = tokio::signal::unix::signal(kind).expect("failed to create signal");

        let send = self.signal_send.clone();
        tokio::spawn(async move {
            while signal.recv().await.is_some() {
                if send.send(kind).await.is_err() {
                    break;
                }
            }
        });

        self.kinds.push(kind);
        self
    }

    pub async fn recv(&mut self) -> SignalKind {
        self.signal_recv
            .recv()
            .await
            .expect("failed to receive signal")
    }
}
