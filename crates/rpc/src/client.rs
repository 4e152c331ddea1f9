use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{
    errors::{
        CallError, EstimateGasError, EthClientError, GetBalanceError, GetBlockNumberError,
        GetChainIdError, GetCodeError, GetGasPriceError, GetMaxPriorityFeeError, GetNonceError,
        GetTransactionReceiptError, SendRawTransactionError, is_nonce_collision,
    },
    receipt::RpcReceipt,
    transaction::{AccessList, EIP1559Transaction, TxKind},
    utils::{RpcErrorResponse, RpcRequest, RpcSuccessResponse},
};

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum RpcResponse {
    Success(RpcSuccessResponse),
    Error(RpcErrorResponse),
}

/// JSON-RPC client over one or more node endpoints.
///
/// Transport failures retry with exponential backoff; errors the node itself
/// returned (reverts, nonce collisions) surface immediately.
#[derive(Debug, Clone)]
pub struct EthClient {
    client: Client,
    pub urls: Vec<Url>,
    pub max_number_of_retries: u64,
    pub backoff_factor: u64,
    pub min_retry_delay: u64,
    pub max_retry_delay: u64,
    pub maximum_allowed_max_fee_per_gas: Option<u64>,
}

#[derive(Default, Clone, Debug)]
pub struct Overrides {
    pub from: Option<Address>,
    pub to: Option<TxKind>,
    pub value: Option<U256>,
    pub nonce: Option<u64>,
    pub chain_id: Option<u64>,
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<u64>,
    pub max_priority_fee_per_gas: Option<u64>,
    pub access_list: AccessList,
    pub block: Option<BlockIdentifier>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockIdentifier {
    Number(u64),
    #[default]
    Latest,
    Pending,
}

impl From<BlockIdentifier> for serde_json::Value {
    fn from(value: BlockIdentifier) -> Self {
        match value {
            BlockIdentifier::Number(number) => json!(format!("{number:#x}")),
            BlockIdentifier::Latest => json!("latest"),
            BlockIdentifier::Pending => json!("pending"),
        }
    }
}

pub const MAX_NUMBER_OF_RETRIES: u64 = 5;
pub const BACKOFF_FACTOR: u64 = 2;
pub const MIN_RETRY_DELAY: u64 = 1;
pub const MAX_RETRY_DELAY: u64 = 60;

impl EthClient {
    pub fn new(url: &str) -> Result<EthClient, EthClientError> {
        Self::new_with_config(
            vec![url],
            MAX_NUMBER_OF_RETRIES,
            BACKOFF_FACTOR,
            MIN_RETRY_DELAY,
            MAX_RETRY_DELAY,
            None,
        )
    }

    pub fn new_with_config(
        urls: Vec<&str>,
        max_number_of_retries: u64,
        backoff_factor: u64,
        min_retry_delay: u64,
        max_retry_delay: u64,
        maximum_allowed_max_fee_per_gas: Option<u64>,
    ) -> Result<Self, EthClientError> {
        let urls = urls
            .iter()
            .map(|url| {
                Url::parse(url)
                    .map_err(|_| EthClientError::ParseUrlError(format!("Failed to parse {url}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            client: Client::new(),
            urls,
            max_number_of_retries,
            backoff_factor,
            min_retry_delay,
            max_retry_delay,
            maximum_allowed_max_fee_per_gas,
        })
    }

    /// Sends the request to each configured endpoint in turn, retrying
    /// transport failures with exponential backoff.
    pub async fn send_request(&self, request: RpcRequest) -> Result<RpcResponse, EthClientError> {
        let mut attempt = 0u64;
        loop {
            match self.send_request_once(&request).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_transient() && attempt + 1 < self.max_number_of_retries => {
                    let delay = self
                        .backoff_factor
                        .saturating_pow(attempt as u32)
                        .clamp(self.min_retry_delay, self.max_retry_delay);
                    warn!(
                        method = %request.method,
                        attempt = attempt + 1,
                        delay_seconds = delay,
                        "Transient RPC failure, retrying: {error}"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn send_request_once(&self, request: &RpcRequest) -> Result<RpcResponse, EthClientError> {
        let mut response = Err(EthClientError::FailedAllRPC("No RPC endpoints".to_string()));

        for url in self.urls.iter() {
            response = self.send_request_to_url(url, request).await;
            // Some RPC servers don't implement all the endpoints or don't
            // implement them completely/correctly, so on an error response
            // we still try the other endpoints.
            if let Ok(RpcResponse::Success(_)) = response {
                return response;
            }
        }
        response
    }

    async fn send_request_to_url(
        &self,
        rpc_url: &Url,
        request: &RpcRequest,
    ) -> Result<RpcResponse, EthClientError> {
        self.client
            .post(rpc_url.as_str())
            .header("content-type", "application/json")
            .body(serde_json::ser::to_string(&request).map_err(|error| {
                EthClientError::FailedToSerializeRequestBody(format!("{error}: {request:?}"))
            })?)
            .send()
            .await?
            .json::<RpcResponse>()
            .await
            .map_err(EthClientError::from)
    }

    pub async fn send_raw_transaction(&self, data: &[u8]) -> Result<H256, EthClientError> {
        let params = Some(vec![json!("0x".to_string() + &hex::encode(data))]);
        let request = RpcRequest::new("eth_sendRawTransaction", params);

        match self.send_request(request).await? {
            RpcResponse::Success(result) => serde_json::from_value(result.result)
                .map_err(SendRawTransactionError::SerdeJSONError)
                .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                if is_nonce_collision(&error_response.error.message) {
                    Err(EthClientError::NonceCollision(error_response.error.message))
                } else {
                    Err(SendRawTransactionError::RPCError(error_response.error.message).into())
                }
            }
        }
    }

    pub async fn call(
        &self,
        to: Address,
        calldata: Bytes,
        overrides: Overrides,
    ) -> Result<String, EthClientError> {
        let params = Some(vec![
            json!({
                "to": format!("{to:#x}"),
                "input": format!("0x{}", hex::encode(&calldata)),
                "value": format!("{:#x}", overrides.value.unwrap_or_default()),
                "from": format!("{:#x}", overrides.from.unwrap_or_default()),
            }),
            overrides
                .block
                .map(Into::into)
                .unwrap_or(serde_json::Value::String("latest".to_string())),
        ]);

        let request = RpcRequest::new("eth_call", params);

        match self.send_request(request).await? {
            RpcResponse::Success(result) => serde_json::from_value(result.result)
                .map_err(CallError::SerdeJSONError)
                .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                Err(CallError::RPCError(error_response.error.message).into())
            }
        }
    }

    pub async fn estimate_gas(
        &self,
        transaction: &EIP1559Transaction,
        from: Address,
    ) -> Result<u64, EthClientError> {
        let to = match transaction.to {
            TxKind::Call(addr) => Some(format!("{addr:#x}")),
            TxKind::Create => None,
        };

        let data = json!({
            "to": to,
            "input": format!("0x{}", hex::encode(&transaction.data)),
            "from": format!("{from:#x}"),
            "value": format!("{:#x}", transaction.value),
            "nonce": format!("{:#x}", transaction.nonce),
        });

        let request = RpcRequest::new("eth_estimateGas", Some(vec![data, json!("latest")]));

        match self.send_request(request).await? {
            RpcResponse::Success(result) => {
                let res = serde_json::from_value::<String>(result.result)
                    .map_err(EstimateGasError::SerdeJSONError)?;
                let res = res.get(2..).ok_or(EstimateGasError::Custom(
                    "Failed to slice index response in estimate_gas".to_owned(),
                ))?;
                u64::from_str_radix(res, 16)
            }
            .map_err(EstimateGasError::ParseIntError)
            .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                Err(EstimateGasError::RPCError(error_response.error.message).into())
            }
        }
    }

    pub async fn get_gas_price(&self) -> Result<U256, EthClientError> {
        let request = RpcRequest::new("eth_gasPrice", None);

        match self.send_request(request).await? {
            RpcResponse::Success(result) => serde_json::from_value(result.result)
                .map_err(GetGasPriceError::SerdeJSONError)
                .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                Err(GetGasPriceError::RPCError(error_response.error.message).into())
            }
        }
    }

    pub async fn get_gas_price_with_extra(
        &self,
        bump_percent: u64,
    ) -> Result<U256, EthClientError> {
        let gas_price = self.get_gas_price().await?;

        Ok((gas_price * (100 + bump_percent)) / 100)
    }

    pub async fn get_max_priority_fee(&self) -> Result<U256, EthClientError> {
        let request = RpcRequest::new("eth_maxPriorityFeePerGas", None);

        match self.send_request(request).await? {
            RpcResponse::Success(result) => serde_json::from_value(result.result)
                .map_err(GetMaxPriorityFeeError::SerdeJSONError)
                .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                Err(GetMaxPriorityFeeError::RPCError(error_response.error.message).into())
            }
        }
    }

    pub async fn get_nonce(
        &self,
        address: Address,
        block: BlockIdentifier,
    ) -> Result<u64, EthClientError> {
        let params = Some(vec![json!(format!("{address:#x}")), block.into()]);
        let request = RpcRequest::new("eth_getTransactionCount", params);

        match self.send_request(request).await? {
            RpcResponse::Success(result) => u64::from_str_radix(
                serde_json::from_value::<String>(result.result)
                    .map_err(GetNonceError::SerdeJSONError)?
                    .get(2..)
                    .ok_or(EthClientError::Custom(
                        "Failed to deserialize get_nonce request".to_owned(),
                    ))?,
                16,
            )
            .map_err(GetNonceError::ParseIntError)
            .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                Err(GetNonceError::RPCError(error_response.error.message).into())
            }
        }
    }

    pub async fn get_block_number(&self) -> Result<U256, EthClientError> {
        let request = RpcRequest::new("eth_blockNumber", None);

        match self.send_request(request).await? {
            RpcResponse::Success(result) => serde_json::from_value(result.result)
                .map_err(GetBlockNumberError::SerdeJSONError)
                .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                Err(GetBlockNumberError::RPCError(error_response.error.message).into())
            }
        }
    }

    pub async fn get_chain_id(&self) -> Result<U256, EthClientError> {
        let request = RpcRequest::new("eth_chainId", None);

        match self.send_request(request).await? {
            RpcResponse::Success(result) => serde_json::from_value(result.result)
                .map_err(GetChainIdError::SerdeJSONError)
                .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                Err(GetChainIdError::RPCError(error_response.error.message).into())
            }
        }
    }

    pub async fn get_balance(
        &self,
        address: Address,
        block: BlockIdentifier,
    ) -> Result<U256, EthClientError> {
        let params = Some(vec![json!(format!("{address:#x}")), block.into()]);
        let request = RpcRequest::new("eth_getBalance", params);

        match self.send_request(request).await? {
            RpcResponse::Success(result) => serde_json::from_value(result.result)
                .map_err(GetBalanceError::SerdeJSONError)
                .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                Err(GetBalanceError::RPCError(error_response.error.message).into())
            }
        }
    }

    pub async fn get_code(
        &self,
        address: Address,
        block: BlockIdentifier,
    ) -> Result<Bytes, EthClientError> {
        let params = Some(vec![json!(format!("{address:#x}")), block.into()]);
        let request = RpcRequest::new("eth_getCode", params);

        match self.send_request(request).await? {
            RpcResponse::Success(result) => hex::decode(
                &serde_json::from_value::<String>(result.result)
                    .map(|hex_str| {
                        hex_str
                            .strip_prefix("0x")
                            .map(ToString::to_string)
                            .unwrap_or(hex_str)
                    })
                    .map_err(GetCodeError::SerdeJSONError)
                    .map_err(EthClientError::from)?,
            )
            .map(Into::into)
            .map_err(GetCodeError::NotHexError)
            .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                Err(GetCodeError::RPCError(error_response.error.message).into())
            }
        }
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<RpcReceipt>, EthClientError> {
        let params = Some(vec![json!(format!("{tx_hash:#x}"))]);
        let request = RpcRequest::new("eth_getTransactionReceipt", params);

        match self.send_request(request).await? {
            RpcResponse::Success(result) => serde_json::from_value(result.result)
                .map_err(GetTransactionReceiptError::SerdeJSONError)
                .map_err(EthClientError::from),
            RpcResponse::Error(error_response) => {
                Err(GetTransactionReceiptError::RPCError(error_response.error.message).into())
            }
        }
    }
}
