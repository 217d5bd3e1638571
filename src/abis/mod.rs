pub mod aave;
pub mod periphery;

pub use aave::{
    IAaveOracle, IPool, IPoolAddressesProvider, IPoolDataProvider, IRewardsController,
};
pub use periphery::{Call3, IAggregatorV3, IERC20Metadata, IMulticall3, McResult};
