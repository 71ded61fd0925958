//! Erasure codec — Reed-Solomon block repair over GF(2^8).
//!
//! A block of D data packets carries E parity packets; any D of the D+E
//! packets reconstruct the missing data bit-exactly. Encoding happens on the
//! vehicle; the ground station only decodes. `encode` exists for tests and
//! the integration channel simulator.
//!
//! All shards in one call must have the same length — the reassembly buffer
//! zero-pads every stored payload to the block's packet size before repair.

use reed_solomon_erasure::galois_8::ReedSolomon;

/// Errors from a repair or encode attempt. None of these are fatal; a failed
/// repair leaves the block incomplete and the retransmission path takes over.
#[derive(Debug, thiserror::Error)]
pub enum FecError {
    #[error("invalid block geometry: {data} data + {ec} ec packets")]
    BadGeometry { data: usize, ec: usize },

    #[error("erasure coding failed: {0}")]
    Library(#[from] reed_solomon_erasure::Error),
}

/// Repair missing data shards in place.
///
/// `shards` holds the block's D+E packet payloads in position order, `None`
/// for missing packets. On success every data position 0..D is `Some` and the
/// indices of the newly recovered data shards are returned. Parity positions
/// are left as provided.
pub fn reconstruct(
    data: usize,
    ec: usize,
    shards: &mut [Option<Vec<u8>>],
) -> Result<Vec<usize>, FecError> {
    if data == 0 || ec == 0 || shards.len() != data + ec {
        return Err(FecError::BadGeometry { data, ec });
    }

    let missing: Vec<usize> = (0..data).filter(|&i| shards[i].is_none()).collect();
    if missing.is_empty() {
        return Ok(Vec::new());
    }

    let rs = ReedSolomon::new(data, ec)?;
    rs.reconstruct_data(shards)?;

    Ok(missing)
}

/// Produce E parity shards for the given data shards. Test/simulator side of
/// the codec; the vehicle encoder is the production counterpart.
pub fn encode(data_shards: &[Vec<u8>], ec: usize) -> Result<Vec<Vec<u8>>, FecError> {
    let data = data_shards.len();
    if data == 0 || ec == 0 {
        return Err(FecError::BadGeometry { data, ec });
    }

    let shard_len = data_shards[0].len();
    let mut shards: Vec<Vec<u8>> = data_shards.to_vec();
    shards.extend(std::iter::repeat(vec![0u8; shard_len]).take(ec));

    let rs = ReedSolomon::new(data, ec)?;
    rs.encode(&mut shards)?;

    Ok(shards.split_off(data))
}
