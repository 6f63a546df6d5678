// Domain-layer modules and shared errors/models
pub mod fit_score {
    pub use crate::fit_score::*;
}

pub mod fit_score_service {
    pub use crate::fit_score_service::*;
}

pub mod plan_change {
    pub use crate::plan_change::*;
}

pub mod rate_limit {
    pub use crate::rate_limit::*;
}

pub mod social_links {
    pub use crate::social_links::*;
}

pub mod tipping {
    pub use crate::tipping::*;
}

pub mod pixels {
    pub use crate::pixels::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
