mod api;

pub use api::*;

use rest::RestApi;

pub type PriceSourceImpl = RestPriceSource;

pub fn init_price_source(rest: RestApi) -> PriceSourceImpl {
    RestPriceSource::new(rest)
}
