mod routes;

pub use routes::create_router;
