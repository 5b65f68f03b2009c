use crate::network::protocol::{Payload, RequestResult};
use std::future::Future;
use std::pin::Pin;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Option<RequestResult>> + Send + 'a>>;

/// Persistence collaborator invoked for `Database;<operation>,<argument>`
/// requests. Returning `None` means no reply is sent to the requester.
///
/// Any `Fn(String, String, Payload)` closure returning a future of
/// `Option<RequestResult>` is a handler.
pub trait DatabaseHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        operation: &'a str,
        argument: &'a str,
        payload: Payload,
    ) -> HandlerFuture<'a>;
}

impl<F, Fut> DatabaseHandler for F
where
    F: Fn(String, String, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Option<RequestResult>> + Send + 'static,
{
    fn handle<'a>(
        &'a self,
        operation: &'a str,
        argument: &'a str,
        payload: Payload,
    ) -> HandlerFuture<'a> {
        Box::pin(self(operation.to_string(), argument.to_string(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_closure_handler() {
        let handler: Arc<dyn DatabaseHandler> = Arc::new(
            |operation: String, argument: String, _payload: Payload| async move {
                Some(RequestResult {
                    success: Some(operation == "Login" && argument == "alice"),
                    object: None,
                })
            },
        );

        let result = handler.handle("Login", "alice", Payload::None).await.unwrap();
        assert_eq!(result.success, Some(true));
        let result = handler.handle("Signup", "alice", Payload::None).await.unwrap();
        assert_eq!(result.success, Some(false));
    }
}
