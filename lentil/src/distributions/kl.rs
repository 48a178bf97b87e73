use super::{Density, Family};

use candle_core::{Result, Tensor};

/// Closed-form element-wise KL(q || p) when one is known.
///
/// Only the Normal/Normal pair is analytic here:
///
/// KL = ln(σp/σq) + (σq² + (μq - μp)²) / (2σp²) - 1/2
///
/// # Returns
/// `None` when no closed form is available for the pair
pub fn kl_divergence(q: &dyn Density, p: &dyn Density) -> Result<Option<Tensor>> {
    if q.family() != Family::Normal || p.family() != Family::Normal {
        return Ok(None);
    }
    let (Some((mq, sq)), Some((mp, sp))) = (q.location_scale(), p.location_scale()) else {
        return Ok(None);
    };

    let log_ratio = sp.log()?.broadcast_sub(&sq.log()?)?;
    let num = sq.sqr()?.broadcast_add(&mq.broadcast_sub(mp)?.sqr()?)?;
    let quad = num.broadcast_div(&(sp.sqr()? * 2.0)?)?;
    let kl = (log_ratio.broadcast_add(&quad)? - 0.5)?;
    Ok(Some(kl))
}
