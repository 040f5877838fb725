use alloy_provider::DynProvider;

mod flux_aggregator {
    alloy_sol_macro::sol!(
        #[allow(missing_docs)]
        #[sol(rpc)]
        #[derive(Debug)]
        interface IFluxAggregator {
            event NewRound(uint256 indexed roundId, address indexed startedBy, uint256 startedAt);
            event AnswerUpdated(int256 indexed current, uint256 indexed roundId, uint256 updatedAt);

            function oracleRoundState(address oracle, uint32 queriedRoundId)
                external
                view
                returns (
                    bool eligibleToSubmit,
                    uint32 roundId,
                    int256 latestSubmission,
                    uint64 startedAt,
                    uint64 timeout,
                    uint128 availableFunds,
                    uint8 oracleCount,
                    uint128 paymentAmount
                );

            function latestRoundData()
                external
                view
                returns (
                    uint80 roundId,
                    int256 answer,
                    uint256 startedAt,
                    uint256 updatedAt,
                    uint80 answeredInRound
                );

            function getOracles() external view returns (address[] memory);
            function minSubmissionValue() external view returns (int256);
            function maxSubmissionValue() external view returns (int256);

            function submit(uint256 roundId, int256 submission) external;
        }
    );
}

mod flags {
    alloy_sol_macro::sol!(
        #[allow(missing_docs)]
        #[sol(rpc)]
        #[derive(Debug)]
        interface IFlags {
            event FlagRaised(address indexed subject);
            event FlagLowered(address indexed subject);

            function getFlags(address[] calldata subjects) external view returns (bool[] memory);
        }
    );
}

pub use flags::IFlags;
pub use flux_aggregator::IFluxAggregator;

pub type IFluxAggregatorT = IFluxAggregator::IFluxAggregatorInstance<DynProvider>;

pub type IFlagsT = IFlags::IFlagsInstance<DynProvider>;
