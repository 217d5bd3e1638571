use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IPoolAddressesProvider {
        function getPool() external view returns (address);
        function getPriceOracle() external view returns (address);
        function getPoolDataProvider() external view returns (address);
    }

    #[sol(rpc)]
    interface IPool {
        function getReservesList() external view returns (address[] memory);
    }

    #[sol(rpc)]
    interface IPoolDataProvider {
        function getReserveConfigurationData(address asset)
            external
            view
            returns (
                uint256 decimals,
                uint256 ltv,
                uint256 liquidationThreshold,
                uint256 liquidationBonus,
                uint256 reserveFactor,
                bool usageAsCollateralEnabled,
                bool borrowingEnabled,
                bool stableBorrowRateEnabled,
                bool isActive,
                bool isFrozen
            );

        function getReserveData(address asset)
            external
            view
            returns (
                uint256 unbacked,
                uint256 accruedToTreasuryScaled,
                uint256 totalAToken,
                uint256 totalStableDebt,
                uint256 totalVariableDebt,
                uint256 liquidityRate,
                uint256 variableBorrowRate,
                uint256 stableBorrowRate,
                uint256 averageStableBorrowRate,
                uint256 liquidityIndex,
                uint256 variableBorrowIndex,
                uint40 lastUpdateTimestamp
            );

        function getReserveCaps(address asset)
            external
            view
            returns (uint256 borrowCap, uint256 supplyCap);

        function getReserveTokensAddresses(address asset)
            external
            view
            returns (
                address aTokenAddress,
                address stableDebtTokenAddress,
                address variableDebtTokenAddress
            );
    }

    #[sol(rpc)]
    interface IAaveOracle {
        function BASE_CURRENCY() external view returns (address);
        function BASE_CURRENCY_UNIT() external view returns (uint256);
        function getAssetsPrices(address[] calldata assets) external view returns (uint256[] memory);
    }

    #[sol(rpc)]
    interface IRewardsController {
        function getRewardsByAsset(address asset) external view returns (address[] memory);
        function getRewardsData(address asset, address reward)
            external
            view
            returns (
                uint256 index,
                uint256 emissionPerSecond,
                uint256 lastUpdateTimestamp,
                uint256 distributionEnd
            );
    }
}
