use cmdwire_frame::{Frame, FrameKind, Value};

use crate::fault::Fault;
use crate::handler::CallContext;
use crate::registry::CommandRegistry;

/// Resolve, check and run one command.
pub fn invoke(
    registry: &CommandRegistry,
    ctx: &CallContext,
    command: &str,
    args: Vec<Value>,
) -> Result<Value, Fault> {
    let descriptor = registry.resolve(command)?;
    descriptor.check_arguments(&args)?;
    descriptor.invoke(ctx, args)
}

/// Run an inbound request or fire frame against `registry`.
///
/// Returns the reply frame for a request (response or fault). Fire frames
/// never produce a reply; their faults are logged and dropped.
pub fn dispatch(registry: &CommandRegistry, ctx: &CallContext, frame: Frame) -> Option<Frame> {
    let kind = frame.kind();
    let correlation_id = frame.correlation_id();
    let command = frame.command().to_string();

    match (kind, correlation_id) {
        (FrameKind::Request, Some(id)) => {
            let reply = match invoke(registry, ctx, &command, frame.into_payload()) {
                Ok(value) => Frame::response(id, command.as_str(), value),
                Err(fault) => {
                    tracing::debug!(
                        connection = %ctx.connection_id(),
                        command = %command,
                        correlation_id = id,
                        fault = %fault,
                        "request failed"
                    );
                    fault.to_frame(id, &command)
                }
            };
            Some(reply)
        }
        (FrameKind::Fire, _) => {
            if let Err(fault) = invoke(registry, ctx, &command, frame.into_payload()) {
                tracing::warn!(
                    connection = %ctx.connection_id(),
                    endpoint = %ctx.endpoint(),
                    command = %command,
                    fault = %fault,
                    "fire-and-forget command failed"
                );
            }
            None
        }
        _ => {
            tracing::warn!(
                connection = %ctx.connection_id(),
                kind = %kind,
                command = %command,
                "ignoring reply frame passed to dispatch"
            );
            None
        }
    }
}
