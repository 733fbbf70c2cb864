//! The `(expected, observed) -> Diff` contract every materialiser in this
//! package implements. Keeping the decision pure means each materialiser
//! is unit-tested without a fake orchestrator; the harness performs the
//! single resulting I/O call.

#[derive(Debug, Clone, PartialEq)]
pub enum Diff<T> {
    Create,
    Update(T),
    None,
}
