//! Service registration and dispatch.
//!
//! A [`Service`] is a named group of methods. Each method is registered as
//! a typed async closure and erased to a uniform shape the server can
//! dispatch by name: decode the request body under the connection's wire
//! format, run the handler, encode the reply. The runtime mapping is
//! `name -> (decoder, dispatcher, encoder)`, captured at registration.
//!
//! ```ignore
//! let service = Service::builder("Arith")
//!     .method("Sum", |args: SumArgs| async move { Ok(args.num1 + args.num2) })
//!     .build()?;
//! ```
//!
//! Handler errors are strings; they travel to the caller verbatim in the
//! response header.

use crate::error::ServerError;
use bytes::Bytes;
use geerpc_protocol::WireFormat;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Boxed future returned by erased method handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Erased handler: body bytes in, encoded reply bytes (or error string) out.
type MethodFn =
    Box<dyn Fn(WireFormat, Bytes) -> BoxFuture<'static, Result<Bytes, String>> + Send + Sync>;

/// A registered method: the erased handler plus an invocation counter.
///
/// The counter lives behind the handler's argument decode: a body that
/// fails to decode is a dispatch error, not an invocation.
pub struct Method {
    handler: MethodFn,
    num_calls: Arc<AtomicU64>,
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("num_calls", &self.num_calls)
            .finish_non_exhaustive()
    }
}

impl Method {
    /// Invokes the method.
    pub async fn call(&self, format: WireFormat, body: Bytes) -> Result<Bytes, String> {
        (self.handler)(format, body).await
    }

    /// Number of times this method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }
}

/// A named group of methods callable over RPC.
#[derive(Debug)]
pub struct Service {
    name: String,
    methods: HashMap<String, Method>,
}

impl Service {
    /// Starts building a service. The name must be exported (start with an
    /// uppercase letter); [`ServiceBuilder::build`] rejects it otherwise.
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a method by its simple name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Registered method names, for diagnostics.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// Builder collecting typed method handlers.
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, Method>,
}

impl ServiceBuilder {
    /// Registers a method handler.
    ///
    /// `Args` is decoded from the request body under the connection's wire
    /// format; the returned `Reply` is encoded the same way. An `Err`
    /// string becomes the response header's error field.
    pub fn method<Args, Reply, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        Args: DeserializeOwned + Send + 'static,
        Reply: Serialize + Send + 'static,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, String>> + Send + 'static,
    {
        let num_calls = Arc::new(AtomicU64::new(0));
        let counter = num_calls.clone();
        let erased: MethodFn = Box::new(move |format, body| {
            let args: Args = match format.decode(&body) {
                Ok(v) => v,
                Err(e) => {
                    let msg = format!("rpc server: decode args error: {e}");
                    return Box::pin(async move { Err(msg) });
                }
            };
            counter.fetch_add(1, Ordering::Relaxed);
            let fut = handler(args);
            Box::pin(async move {
                let reply = fut.await?;
                format
                    .encode(&reply)
                    .map(Bytes::from)
                    .map_err(|e| format!("rpc server: encode reply error: {e}"))
            })
        });

        self.methods.insert(
            name.into(),
            Method {
                handler: erased,
                num_calls,
            },
        );
        self
    }

    /// Finalizes the service, validating the exported-name rule.
    pub fn build(self) -> Result<Service, ServerError> {
        if !self.name.chars().next().is_some_and(|c| c.is_uppercase()) {
            return Err(ServerError::InvalidServiceName(self.name));
        }
        Ok(Service {
            name: self.name,
            methods: self.methods,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct SumArgs {
        num1: i32,
        num2: i32,
    }

    fn arith() -> Service {
        Service::builder("Arith")
            .method("Sum", |args: SumArgs| async move {
                Ok(args.num1 + args.num2)
            })
            .method("Div", |args: SumArgs| async move {
                if args.num2 == 0 {
                    return Err("divide by zero".to_string());
                }
                Ok(args.num1 / args.num2)
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch() {
        let service = arith();
        let format = WireFormat::Msgpack;
        let body = format.encode(&SumArgs { num1: 2, num2: 3 }).unwrap();

        let reply = service
            .method("Sum")
            .unwrap()
            .call(format, Bytes::from(body))
            .await
            .unwrap();
        let sum: i32 = format.decode(&reply).unwrap();
        assert_eq!(sum, 5);
    }

    #[tokio::test]
    async fn test_method_error_string() {
        let service = arith();
        let format = WireFormat::Json;
        let body = format.encode(&SumArgs { num1: 1, num2: 0 }).unwrap();

        let err = service
            .method("Div")
            .unwrap()
            .call(format, Bytes::from(body))
            .await
            .unwrap_err();
        assert_eq!(err, "divide by zero");
    }

    #[tokio::test]
    async fn test_bad_body_is_dispatch_error() {
        let service = arith();
        let err = service
            .method("Sum")
            .unwrap()
            .call(WireFormat::Msgpack, Bytes::from_static(b"\xc3"))
            .await
            .unwrap_err();
        assert!(err.contains("decode args"));
    }

    #[tokio::test]
    async fn test_num_calls_counts_invocations() {
        let service = arith();
        let format = WireFormat::Msgpack;
        let method = service.method("Sum").unwrap();
        assert_eq!(method.num_calls(), 0);

        for _ in 0..3 {
            let body = format.encode(&SumArgs { num1: 1, num2: 1 }).unwrap();
            let _ = method.call(format, Bytes::from(body)).await;
        }
        assert_eq!(method.num_calls(), 3);

        // A body that fails to decode never reaches the method; the
        // counter must not move.
        let err = method
            .call(format, Bytes::from_static(b"\xc3"))
            .await
            .unwrap_err();
        assert!(err.contains("decode args"));
        assert_eq!(method.num_calls(), 3);
    }

    #[test]
    fn test_unexported_name_rejected() {
        let result = Service::builder("arith").build();
        assert!(matches!(result, Err(ServerError::InvalidServiceName(_))));

        let result = Service::builder("").build();
        assert!(matches!(result, Err(ServerError::InvalidServiceName(_))));
    }

    #[test]
    fn test_unknown_method_lookup() {
        let service = arith();
        assert!(service.method("Mul").is_none());
    }
}
