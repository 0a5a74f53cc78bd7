//! Contract bindings: the events the indexer listens for and the read-only
//! calls it uses to enrich what the events alone carry.

use alloy::sol;

// Root factory ("wrapper") events
sol! {
    event NewDaoCreated(
        address dao,
        address token,
        address[] initialMembers,
        uint256[] initialAmounts,
        string name,
        string symbol,
        string description,
        uint256 executionDelay,
        address registry,
        string[] keys,
        string[] values
    );

    event DaoWrappedDeploymentInfo(
        address wrappedTokenAddress,
        address daoAddress,
        address registryAddress,
        string daoName,
        string wrappedTokenSymbol,
        string description,
        uint8 quorumFraction
    );
}

// OpenZeppelin Votes / Governor events
sol! {
    event DelegateChanged(address indexed delegator, address indexed fromDelegate, address indexed toDelegate);

    event ProposalCreated(
        uint256 proposalId,
        address proposer,
        address[] targets,
        uint256[] values,
        string[] signatures,
        bytes[] calldatas,
        uint256 voteStart,
        uint256 voteEnd,
        string description
    );

    event ProposalQueued(uint256 proposalId, uint256 etaSeconds);

    event ProposalExecuted(uint256 proposalId);

    event VoteCast(address indexed voter, uint256 proposalId, uint8 support, uint256 weight, string reason);
}

// AfterMe source and will events
sol! {
    event WillCreated(address indexed owner, address indexed willContract);

    event Ping(uint256 newLastUpdate);

    event Executed(address executor, uint256 ethFee, address feeRecipient);

    event Cancelled(uint256 feePaid);
}

// Governance token (ERC20Votes, optionally an ERC20Wrapper)
sol! {
    #[sol(rpc)]
    interface IVotesToken {
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function getPastTotalSupply(uint256 timepoint) external view returns (uint256);
        function underlying() external view returns (address);
    }
}

// Governor with GovernorSettings + GovernorTimelockControl
sol! {
    #[sol(rpc)]
    interface IGovernor {
        function proposalThreshold() external view returns (uint256);
        function votingDelay() external view returns (uint256);
        function votingPeriod() external view returns (uint256);
        function timelock() external view returns (address);
    }
}

sol! {
    #[sol(rpc)]
    interface ITimelock {
        function getMinDelay() external view returns (uint256);
    }
}

sol! {
    #[sol(rpc)]
    interface IWill {
        struct Erc20Detail {
            address tokenContract;
            uint256 balance;
        }

        struct Erc721Detail {
            address tokenContract;
            uint256 tokenId;
            address heir;
        }

        struct WillDetails {
            address owner;
            uint256 interval;
            uint256 lastUpdate;
            bool executed;
            uint256 ethBalance;
            address[] heirs;
            uint256[] distributionPercentages;
            Erc20Detail[] erc20Details;
            Erc721Detail[] erc721Details;
        }

        function getWillDetails() external view returns (WillDetails memory);
    }
}
