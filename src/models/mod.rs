mod api;

pub use api::{
    ApiResponse, HealthResponse, IdentityResponse, LivenessResponse, ReadinessResponse,
    RootResponse,
};
