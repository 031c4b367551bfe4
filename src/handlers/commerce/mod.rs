pub mod carts;

pub use carts::carts_routes;
