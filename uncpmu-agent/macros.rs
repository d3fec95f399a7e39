//! Declarative macros shared by the box hooks and the HTTP front end

/// Run a register access, logging a warning if it fails
///
/// Evaluates to `true` on success. Box hooks use it where the counter
/// bookkeeping has already changed and the error cannot be returned.
///
/// # Example
/// ```ignore
/// hw_warn!(self.hw_enable_box(), "enable {} box {}", self.ty().name, self.index());
/// ```
#[macro_export]
macro_rules! hw_warn {
    ($access:expr, $($what:tt)+) => {
        match $access {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Failed to {}: {}", format_args!($($what)+), e);
                false
            }
        }
    };
}

/// Encode one or more registries into a text buffer
///
/// # Example
/// ```ignore
/// // In main.rs metrics handler
/// encode_registries!(buffer, encoder, exporter.registry(), prometheus::default_registry());
/// ```
#[macro_export]
macro_rules! encode_registries {
    ($buffer:expr, $encoder:expr, $($registry:expr),+ $(,)?) => {
        $(
            if let Err(e) = $encoder.encode(&$registry.gather(), &mut $buffer) {
                tracing::error!("Failed to encode {}: {}", stringify!($registry), e);
            }
        )+
    };
}
