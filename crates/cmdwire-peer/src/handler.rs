//! Typed command handlers.
//!
//! Any `Fn(&CallContext, A1, .., An) -> HandlerResult<R>` with up to six
//! [`FromValue`] arguments and an [`IntoValue`] result is a [`Handler`]. The
//! argument types fix the parameter shapes recorded at registration.

use std::fmt;
use std::net::SocketAddr;

use cmdwire_frame::{FromValue, IntoValue, Shape, Value};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::fault::Fault;
use crate::server::ClientSet;

/// Error reported by a handler body. Sent to the caller as a
/// `handler_fault`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    message: String,
}

impl HandlerFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E> From<E> for HandlerFault
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

impl From<HandlerFault> for Fault {
    fn from(fault: HandlerFault) -> Self {
        Fault::handler(fault.message)
    }
}

pub type HandlerResult<T> = std::result::Result<T, HandlerFault>;

/// What a handler can see about the connection that invoked it.
#[derive(Clone)]
pub struct CallContext {
    connection: ConnectionHandle,
}

impl CallContext {
    pub fn new(connection: ConnectionHandle) -> Self {
        Self { connection }
    }

    /// The connection the command arrived on.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Remote address of the caller.
    pub fn endpoint(&self) -> SocketAddr {
        self.connection.endpoint()
    }

    /// Every client of the server that accepted this connection. `None` on
    /// the client side or once the server is gone.
    pub fn clients(&self) -> Option<ClientSet> {
        self.connection.client_set()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("connection", &self.connection.id())
            .field("endpoint", &self.connection.endpoint())
            .finish()
    }
}

/// A callable that can be registered under a command name.
///
/// `Args` is the tuple of argument types and only serves to tell the blanket
/// implementations apart.
pub trait Handler<Args>: Send + Sync + 'static {
    fn parameter_shapes(&self) -> Vec<Shape>;

    fn return_shape(&self) -> Shape;

    /// Convert the arguments, run the handler and encode its result.
    fn call(&self, ctx: &CallContext, args: Vec<Value>) -> Result<Value, Fault>;
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn(&CallContext, $($arg),*) -> HandlerResult<R> + Send + Sync + 'static,
            R: IntoValue,
            $($arg: FromValue,)*
        {
            fn parameter_shapes(&self) -> Vec<Shape> {
                vec![$(<$arg as FromValue>::SHAPE),*]
            }

            fn return_shape(&self) -> Shape {
                <R as IntoValue>::SHAPE
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, ctx: &CallContext, args: Vec<Value>) -> Result<Value, Fault> {
                let mut args = args.into_iter();
                $(
                    let $arg = match args.next() {
                        Some(value) => <$arg as FromValue>::from_value(value)
                            .map_err(Fault::argument_mismatch)?,
                        None => return Err(Fault::argument_mismatch("missing argument")),
                    };
                )*
                let result = (self)(ctx, $($arg),*)?;
                result
                    .into_value()
                    .map_err(|err| Fault::handler(format!("result conversion failed: {err}")))
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
