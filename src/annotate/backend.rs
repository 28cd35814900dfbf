use crate::annotate::result::RawAnnotation;
use crate::error::AnnotationError;
use crate::request::AnnotationRequest;

/// Annotation backend trait.
///
/// A backend turns one request into one raw, unvalidated response. It may
/// fail; the `AnnotationClient` wrapping it converts failures into fallbacks
/// so nothing past the client ever sees an error.
pub trait AnnotationBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Model name reported in frame metadata.
    fn model(&self) -> &str;

    /// Run one annotation call. Exactly one attempt, no retry.
    fn annotate(&mut self, request: &AnnotationRequest) -> Result<RawAnnotation, AnnotationError>;
}
