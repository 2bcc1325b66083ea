//! Convenience macros for writing controllers

/// Implement the Controller trait from a single step handler
///
/// # Examples
///
/// ```
/// use obsctl::{ControllerState, impl_controller};
///
/// #[derive(Default)]
/// struct BeamControl {
///     claimed: bool,
/// }
///
/// impl_controller! {
///     BeamControl, std::io::Error => |self, step| {
///         if step.request == ControllerState::Claim {
///             self.claimed = true;
///         }
///         Ok(())
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_controller {
    ($controller:ty, $error:ty => |$self:ident, $step:ident| $body:block) => {
        #[async_trait::async_trait]
        impl $crate::Controller for $controller {
            type Error = $error;

            async fn transition(
                &mut $self,
                $step: &$crate::TransitionStep,
            ) -> Result<(), Self::Error> $body
        }
    };
    ($controller:ty, $error:ty => |$step:ident| $body:block) => {
        #[async_trait::async_trait]
        impl $crate::Controller for $controller {
            type Error = $error;

            async fn transition(
                &mut self,
                $step: &$crate::TransitionStep,
            ) -> Result<(), Self::Error> $body
        }
    };
}
