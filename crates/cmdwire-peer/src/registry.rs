use std::collections::HashMap;
use std::fmt;

use cmdwire_frame::{Shape, Value};

use crate::error::PeerError;
use crate::fault::Fault;
use crate::handler::{CallContext, Handler};

type ErasedHandler = Box<dyn Fn(&CallContext, Vec<Value>) -> Result<Value, Fault> + Send + Sync>;

/// A registered command: its name, parameter shapes and the type-erased
/// handler.
pub struct HandlerDescriptor {
    name: String,
    parameters: Vec<Shape>,
    returns: Shape,
    handler: ErasedHandler,
}

impl HandlerDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Shape] {
        &self.parameters
    }

    pub fn returns(&self) -> Shape {
        self.returns
    }

    /// Check argument count and shapes against the registered parameters.
    pub fn check_arguments(&self, args: &[Value]) -> Result<(), Fault> {
        if args.len() != self.parameters.len() {
            return Err(Fault::argument_mismatch(format!(
                "'{}' takes {} argument(s), got {}",
                self.name,
                self.parameters.len(),
                args.len()
            )));
        }
        for (index, (shape, value)) in self.parameters.iter().zip(args).enumerate() {
            if !shape.accepts(value) {
                return Err(Fault::argument_mismatch(format!(
                    "'{}' argument {index}: expected {shape}, got {}",
                    self.name,
                    value.shape()
                )));
            }
        }
        Ok(())
    }

    /// Run the handler. Arguments are assumed to have passed
    /// [`check_arguments`](Self::check_arguments).
    pub fn invoke(&self, ctx: &CallContext, args: Vec<Value>) -> Result<Value, Fault> {
        (self.handler)(ctx, args)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// Mapping from command name to handler.
///
/// Filled before a server or client starts, then shared read-only.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, HandlerDescriptor>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    ///
    /// Names are case-sensitive. Registering the same name twice fails with
    /// [`PeerError::DuplicateCommand`] and keeps the first handler.
    pub fn register<Args, H>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Result<(), PeerError>
    where
        Args: 'static,
        H: Handler<Args>,
    {
        let name = name.into();
        if name.is_empty() || name.len() > usize::from(u16::MAX) {
            return Err(PeerError::InvalidCommand(name));
        }
        if self.handlers.contains_key(&name) {
            return Err(PeerError::DuplicateCommand(name));
        }

        let descriptor = HandlerDescriptor {
            name: name.clone(),
            parameters: Handler::<Args>::parameter_shapes(&handler),
            returns: Handler::<Args>::return_shape(&handler),
            handler: Box::new(move |ctx: &CallContext, args: Vec<Value>| {
                Handler::<Args>::call(&handler, ctx, args)
            }),
        };
        tracing::debug!(
            command = %name,
            arity = descriptor.parameters.len(),
            "registered command handler"
        );
        self.handlers.insert(name, descriptor);
        Ok(())
    }

    /// Look up the handler for `name`.
    pub fn resolve(&self, name: &str) -> Result<&HandlerDescriptor, Fault> {
        self.handlers
            .get(name)
            .ok_or_else(|| Fault::command_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
