//! Engine limits

/// Nested template invocations allowed before a transform fails
pub const MAX_TEMPLATE_DEPTH: usize = 3000;

/// Parsed XPath expressions kept in the shared cache
pub const XPATH_CACHE_CAPACITY: usize = 256;

/// Stack for the thread that runs a transform. Dirty scheduler threads
/// have small stacks and template recursion is deep.
pub const TRANSFORM_STACK_SIZE: usize = 256 * 1024 * 1024;
