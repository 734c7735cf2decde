pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;
pub mod worldid;

pub use config::ServiceConfig;
pub use contracts::{
    ArbitrationStartedEvent, AuthRequest, ContractCreatedEvent, ContractDecidedEvent,
    ContractView, CreateContractRequest, DecideContractRequest, DeleteTestUsersResponse,
    HealthResponse, IsLinkedRequest, IsLinkedResponse, ListContractsResponse,
    ListLinksResponse, ListMessagesResponse, ListUsersResponse, PostMessageRequest,
    ProofPayload, UpdateStatusRequest, VerifyRequest, VerifyResponse,
    CONTRACTS_ARBITRATION_CHANNEL, CONTRACTS_CREATED_CHANNEL, CONTRACTS_DECIDED_CHANNEL,
};
pub use db::connect_database;
pub use redis_bus::RedisBus;
pub use worldid::{ProofRequest, ProofVerdict, ProofVerifier, WorldcoinClient};
