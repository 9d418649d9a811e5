pub mod engine;
pub mod parsers;
pub mod states;

pub use engine::{
    BookingPort, CatalogError, ConversationEngine, FlowError, FlowSettings, OfferingCatalog,
    TurnInput,
};
pub use states::{
    ConversationContext, ConversationState, FlowAction, TransitionOutcome, TraversalOutcome,
};
