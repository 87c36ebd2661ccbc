pub mod autowiring;
pub mod capture;
pub mod descriptor;
pub mod handle;
pub mod key;
pub mod lifecycle;
pub mod list;
pub mod pending;
pub mod registry;
pub mod scope;
pub mod traversal;
pub mod visualization;

pub use autowiring::{parameter, ConstructorParameter, Injectable};
pub use capture::ResolutionPath;
pub use descriptor::{
    Arg, Args, Callable, Instance, Interceptor, Invocation, Next, Producer, ProducerFn,
    ServiceDescriptor,
};
pub use handle::{AnyHandle, Handle};
pub use key::{ServiceKey, ServiceToken, TypedKey};
pub use lifecycle::ServiceState;
pub use list::ServiceList;
pub use pending::Pending;
pub use registry::{Registry, ServiceAddedListener};
pub use scope::{spawn, ScopeEntry, ScopeFrame, ScopeRedirect};
pub use traversal::VisitAction;
pub use visualization::{
    DependencyVisualizer, GraphSnapshot, ServiceNode, VisualizationFormat, VisualizationStyle,
};
