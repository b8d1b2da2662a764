// SPDX-License-Identifier: MIT

//! Dial a peer and pull blocks.
//!
//! The session starts with a version exchange and a session header
//! (genesis id, a session-unique id, our net address); either side may
//! answer `"stop"` instead of `"accept"`. After that the client issues
//! the `SendBlocks` RPC: a 32-entry rolling history of known block
//! ids, answered by batches of blocks plus a more-available flag.

use std::io;
use std::io::Read;
use std::io::Write;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use log::debug;
use log::info;
use selva_chain::params::ChainParams;
use selva_chain::types::Block;
use selva_chain::CodecError;
use selva_chain::Decodable;
use selva_chain::Encodable;
use selva_common::Hash;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::WireError;
use crate::framing::read_object;
use crate::framing::write_object;

/// Version string sent during the handshake.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Handshake responses.
pub const ACCEPT_RESPONSE: &str = "accept";
pub const STOP_RESPONSE: &str = "stop";

/// How many known block ids the `SendBlocks` request carries.
pub const HISTORY_LEN: usize = 32;

/// Peers answer with at most this many blocks per batch.
pub const MAX_CATCH_UP_BLOCKS: u64 = 10;

/// Hard cap on one encoded block.
pub const BLOCK_SIZE_LIMIT: u64 = 2_000_000;

/// Cap for short handshake strings.
const MAX_HANDSHAKE_LEN: u64 = 100;

/// An RPC name, truncated or zero-padded to eight bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcId(pub [u8; 8]);

impl RpcId {
    pub fn new(name: &str) -> Self {
        let mut id = [0u8; 8];
        let take = name.len().min(8);
        id[..take].copy_from_slice(&name.as_bytes()[..take]);
        RpcId(id)
    }
}

impl Encodable for RpcId {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for RpcId {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(RpcId(<[u8; 8]>::consensus_decode(reader)?))
    }
}

/// What both sides present after the version exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub genesis_id: Hash,
    pub unique_id: [u8; 8],
    pub net_address: String,
}

impl Encodable for SessionHeader {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut written = self.genesis_id.consensus_encode(writer)?;
        written += self.unique_id.consensus_encode(writer)?;
        written += self.net_address.consensus_encode(writer)?;
        Ok(written)
    }
}

impl Decodable for SessionHeader {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(SessionHeader {
            genesis_id: Hash::consensus_decode(reader)?,
            unique_id: <[u8; 8]>::consensus_decode(reader)?,
            net_address: String::consensus_decode(reader)?,
        })
    }
}

/// The rolling history of known block ids, most recent first, genesis
/// last. Encoded as a fixed array, no length prefix.
struct BlockHistory([Hash; HISTORY_LEN]);

impl BlockHistory {
    fn new(prev_block_id: Hash, genesis_id: Hash) -> Self {
        let mut ids = [Hash::all_zeros(); HISTORY_LEN];
        ids[0] = prev_block_id;
        ids[HISTORY_LEN - 1] = genesis_id;
        BlockHistory(ids)
    }
}

impl Encodable for BlockHistory {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut written = 0;
        for id in &self.0 {
            written += id.consensus_encode(writer)?;
        }
        Ok(written)
    }
}

fn session_unique_id() -> [u8; 8] {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    seed.to_le_bytes()
}

/// Dials `node` and runs the handshake. The returned stream is ready
/// for RPCs.
pub async fn connect(node: &str, params: &ChainParams) -> Result<TcpStream, WireError> {
    info!("connecting to node {node}");
    let mut stream = TcpStream::connect(node).await?;

    write_object(&mut stream, PROTOCOL_VERSION).await?;
    let peer_version: String = read_object(&mut stream, MAX_HANDSHAKE_LEN).await?;
    debug!("peer {node} speaks version {peer_version}");

    let our_header = SessionHeader {
        genesis_id: params.genesis_id(),
        unique_id: session_unique_id(),
        net_address: stream
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default(),
    };
    write_object(&mut stream, &our_header).await?;

    let response: String = read_object(&mut stream, MAX_HANDSHAKE_LEN).await?;
    if response == STOP_RESPONSE {
        return Err(WireError::Rejected("peer did not want a connection".into()));
    }
    if response != ACCEPT_RESPONSE {
        return Err(WireError::Rejected(response));
    }

    let _peer_header: SessionHeader = read_object(&mut stream, MAX_HANDSHAKE_LEN).await?;
    write_object(&mut stream, ACCEPT_RESPONSE).await?;

    Ok(stream)
}

/// Issues one `SendBlocks` RPC and drains every batch the peer sends.
/// `prev_block_id` advances as blocks arrive, so the caller keeps its
/// progress even when the connection dies mid-stream.
pub async fn download_blocks(
    stream: &mut TcpStream,
    blocks: &mpsc::Sender<Block>,
    prev_block_id: &mut Hash,
    params: &ChainParams,
) -> Result<(), WireError> {
    write_object(stream, &RpcId::new("SendBlocks")).await?;
    let history = BlockHistory::new(*prev_block_id, params.genesis_id());
    write_object(stream, &history).await?;

    let mut more_available = true;
    while more_available {
        let batch: Vec<Block> =
            read_object(stream, MAX_CATCH_UP_BLOCKS * BLOCK_SIZE_LIMIT).await?;
        more_available = read_object(stream, 1).await?;
        debug!("received {} blocks, more: {more_available}", batch.len());

        for block in batch {
            if block.parent_id != *prev_block_id {
                return Err(WireError::UnexpectedParent);
            }
            let id = block.id();
            blocks
                .send(block)
                .await
                .map_err(|_| WireError::ChannelClosed)?;
            *prev_block_id = id;
        }
    }
    Ok(())
}

/// Downloads the whole chain from `node`, reconnecting as long as each
/// session makes progress. Ends when a session completes cleanly or a
/// disconnected session brought nothing new.
pub async fn download_all_blocks(
    node: &str,
    params: &ChainParams,
    blocks: mpsc::Sender<Block>,
) -> Result<(), WireError> {
    let mut prev_block_id = params.genesis_id();
    loop {
        let mut stream = connect(node, params).await?;
        let before = prev_block_id;
        let result = download_blocks(&mut stream, &blocks, &mut prev_block_id, params).await;
        match result {
            Ok(()) => break,
            Err(err) if err.is_disconnect() => {
                if prev_block_id == before {
                    // The peer hung up without sending anything new;
                    // assume we are caught up.
                    break;
                }
                debug!("peer disconnected mid-sync, redialing {node}");
            }
            Err(err) => return Err(err),
        }
    }
    info!("block download from {node} finished");
    Ok(())
}

#[cfg(test)]
mod test {
    use selva_chain::params::ChainParams;
    use selva_chain::types::Block;
    use tokio::net::TcpListener;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    use super::connect;
    use super::download_blocks;
    use super::RpcId;
    use super::SessionHeader;
    use super::ACCEPT_RESPONSE;
    use super::HISTORY_LEN;
    use super::PROTOCOL_VERSION;
    use crate::error::WireError;
    use crate::framing::read_object;
    use crate::framing::write_object;
    use selva_common::Hash;

    fn test_chain(params: &ChainParams, len: usize) -> Vec<Block> {
        let mut chain = vec![params.genesis_block()];
        for i in 1..len {
            chain.push(Block {
                parent_id: chain[i - 1].id(),
                nonce: [i as u8; 8],
                timestamp: params.genesis_timestamp + 600 * i as u64,
                ..Default::default()
            });
        }
        chain
    }

    /// The server half of the handshake, mirroring `connect`.
    async fn accept_session(stream: &mut TcpStream, params: &ChainParams) {
        let version: String = read_object(stream, 100).await.unwrap();
        assert_eq!(version, PROTOCOL_VERSION);
        write_object(stream, PROTOCOL_VERSION).await.unwrap();

        let header: SessionHeader = read_object(stream, 100).await.unwrap();
        assert_eq!(header.genesis_id, params.genesis_id());
        write_object(stream, ACCEPT_RESPONSE).await.unwrap();
        let our_header = SessionHeader {
            genesis_id: params.genesis_id(),
            unique_id: [9; 8],
            net_address: "127.0.0.1:0".to_string(),
        };
        write_object(stream, &our_header).await.unwrap();
        let response: String = read_object(stream, 100).await.unwrap();
        assert_eq!(response, ACCEPT_RESPONSE);
    }

    #[tokio::test]
    async fn test_handshake_and_download() {
        let params = ChainParams::mainnet();
        let chain = test_chain(&params, 6);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server_params = params.clone();
        let server_chain = chain.clone();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            accept_session(&mut stream, &server_params).await;

            let rpc: RpcId = read_object(&mut stream, 100).await.unwrap();
            assert_eq!(rpc, RpcId::new("SendBlocks"));
            let mut history = vec![0u8; 8 + HISTORY_LEN * 32];
            use tokio::io::AsyncReadExt;
            stream.read_exact(&mut history).await.unwrap();
            // The first history entry is the genesis id
            assert_eq!(
                &history[8..40],
                server_params.genesis_id().as_bytes().as_slice()
            );

            // Everything after genesis, in two batches
            let batch1: Vec<Block> = server_chain[1..3].to_vec();
            let batch2: Vec<Block> = server_chain[3..].to_vec();
            write_object(&mut stream, &batch1).await.unwrap();
            write_object(&mut stream, &true).await.unwrap();
            write_object(&mut stream, &batch2).await.unwrap();
            write_object(&mut stream, &false).await.unwrap();
        });

        let mut stream = connect(&addr, &params).await.unwrap();
        let (sender, mut receiver) = mpsc::channel(16);
        let mut prev = params.genesis_id();
        download_blocks(&mut stream, &sender, &mut prev, &params)
            .await
            .unwrap();
        drop(sender);
        server.await.unwrap();

        let mut received = Vec::new();
        while let Some(block) = receiver.recv().await {
            received.push(block);
        }
        assert_eq!(received.len(), 5);
        assert_eq!(received, chain[1..].to_vec());
        assert_eq!(prev, chain.last().unwrap().id());
    }

    #[tokio::test]
    async fn test_unlinked_block_rejected() {
        let params = ChainParams::mainnet();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server_params = params.clone();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            accept_session(&mut stream, &server_params).await;
            let _rpc: RpcId = read_object(&mut stream, 100).await.unwrap();
            use tokio::io::AsyncReadExt;
            let mut history = vec![0u8; 8 + HISTORY_LEN * 32];
            stream.read_exact(&mut history).await.unwrap();

            // A block whose parent is not the requested tip
            let orphan = Block {
                parent_id: Hash([0xAB; 32]),
                ..Default::default()
            };
            write_object(&mut stream, &vec![orphan]).await.unwrap();
            write_object(&mut stream, &false).await.unwrap();
        });

        let mut stream = connect(&addr, &params).await.unwrap();
        let (sender, _receiver) = mpsc::channel(16);
        let mut prev = params.genesis_id();
        let result = download_blocks(&mut stream, &sender, &mut prev, &params).await;
        assert!(matches!(result, Err(WireError::UnexpectedParent)));
        server.await.unwrap();
    }
}
