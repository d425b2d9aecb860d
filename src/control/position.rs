//! Position controller: one XYZ facade over per-axis stage adapters.
//!
//! Each axis is bound at construction to the adapter that owns it. The XY
//! stage and the Z piezo are separate devices with different working units,
//! so every binding also names the unit the controller speaks for that axis
//! (the grid unit). Conversion into the stage's own unit happens inside the
//! adapter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{ScanError, ScanResult};
use crate::hardware::capabilities::Movable;
use crate::hardware::units::LengthUnit;

/// Stage axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Innermost grid axis
    X,
    /// Middle grid axis
    Y,
    /// Outermost grid axis
    Z,
}

impl Axis {
    /// Every axis, in grid nesting order from innermost.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Index into `[x, y, z]` arrays.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

/// A point in stage space, one coordinate per axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionVector {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl PositionVector {
    /// Vector from three coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Coordinate on `axis`.
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Replace the coordinate on `axis`.
    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }

    /// Coordinates as `[x, y, z]`.
    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for PositionVector {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for PositionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}

struct AxisBinding {
    axis: Axis,
    stage: Arc<dyn Movable>,
    unit: LengthUnit,
}

/// Per-axis result of [`PositionController::get_position`].
///
/// A failed axis does not hide the others: each bound axis carries its own
/// readback or error.
#[derive(Debug)]
pub struct PositionReadback {
    /// Readback or error per bound axis, in axis order
    pub axes: Vec<(Axis, ScanResult<f64>)>,
}

impl PositionReadback {
    /// True when every bound axis read back.
    pub fn is_complete(&self) -> bool {
        self.axes.iter().all(|(_, r)| r.is_ok())
    }

    /// Readback for `axis`, if bound.
    pub fn axis(&self, axis: Axis) -> Option<&ScanResult<f64>> {
        self.axes.iter().find(|(a, _)| *a == axis).map(|(_, r)| r)
    }

    /// Collapse into a vector, failing with the first per-axis error.
    ///
    /// Unbound axes read as 0.0.
    pub fn into_vector(self) -> ScanResult<PositionVector> {
        let mut vector = PositionVector::default();
        for (axis, reading) in self.axes {
            vector.set(axis, reading?);
        }
        Ok(vector)
    }
}

impl fmt::Display for PositionReadback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (axis, reading)) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match reading {
                Ok(v) => write!(f, "{}", v)?,
                Err(_) => write!(f, "{}=?", axis)?,
            }
        }
        write!(f, "]")
    }
}

/// Aggregates stage adapters behind a single set/get position interface.
#[derive(Default)]
pub struct PositionController {
    bindings: Vec<AxisBinding>,
}

impl PositionController {
    /// Controller with no axes bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `axis` to `stage`; coordinates for this axis are given in `unit`.
    pub fn with_axis(
        mut self,
        axis: Axis,
        stage: Arc<dyn Movable>,
        unit: LengthUnit,
    ) -> ScanResult<Self> {
        if self.bindings.iter().any(|b| b.axis == axis) {
            return Err(ScanError::configuration(format!(
                "Axis {} is already bound to a stage",
                axis
            )));
        }
        self.bindings.push(AxisBinding { axis, stage, unit });
        self.bindings.sort_by_key(|b| b.axis);
        Ok(self)
    }

    /// Axes with a stage, in axis order.
    pub fn bound_axes(&self) -> Vec<Axis> {
        self.bindings.iter().map(|b| b.axis).collect()
    }

    /// Reject `target` if any bound axis would leave its travel range.
    ///
    /// Also rejects a non-zero coordinate on an axis with no stage.
    pub fn check_bounds(&self, target: &PositionVector) -> ScanResult<()> {
        for axis in Axis::ALL {
            let value = target.get(axis);
            let Some(binding) = self.bindings.iter().find(|b| b.axis == axis) else {
                if value != 0.0 {
                    return Err(ScanError::configuration(format!(
                        "No stage bound to axis {} (requested {})",
                        axis, value
                    )));
                }
                continue;
            };
            self.check_axis(binding, value)?;
        }
        Ok(())
    }

    /// Move every bound axis to `target` and block until each reports settled.
    ///
    /// All axes are bounds-checked before the first move is issued, so an
    /// out-of-range target leaves the whole stage where it was.
    pub async fn set_position(&self, target: &PositionVector) -> ScanResult<()> {
        self.check_bounds(target)?;
        for binding in &self.bindings {
            binding
                .stage
                .move_abs(target.get(binding.axis), binding.unit)
                .await?;
            binding.stage.wait_settled().await?;
        }
        Ok(())
    }

    /// Move one axis, bounds-checked the same way as [`set_position`](Self::set_position).
    pub async fn move_axis(&self, axis: Axis, target: f64) -> ScanResult<()> {
        let binding = self.binding(axis)?;
        self.check_axis(binding, target)?;
        binding.stage.move_abs(target, binding.unit).await?;
        binding.stage.wait_settled().await
    }

    fn binding(&self, axis: Axis) -> ScanResult<&AxisBinding> {
        self.bindings
            .iter()
            .find(|b| b.axis == axis)
            .ok_or_else(|| ScanError::configuration(format!("No stage bound to axis {}", axis)))
    }

    fn check_axis(&self, binding: &AxisBinding, value: f64) -> ScanResult<()> {
        if let Some(limits) = binding.stage.travel_limits() {
            let working = binding.stage.working_unit();
            let native = binding.unit.convert(value, working, binding.stage.native_per_mm())?;
            if !limits.contains(native) {
                return Err(ScanError::out_of_range(
                    format!("{} position ({})", binding.axis, working),
                    native,
                    limits.lower,
                    limits.upper,
                ));
            }
        }
        Ok(())
    }

    /// Read back every bound axis independently.
    pub async fn get_position(&self) -> PositionReadback {
        let mut axes = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            axes.push((binding.axis, binding.stage.position(binding.unit).await));
        }
        PositionReadback { axes }
    }

    /// Home every bound axis that is not already homed.
    pub async fn home_all(&self) -> ScanResult<()> {
        for binding in &self.bindings {
            if !binding.stage.is_homed().await? {
                tracing::info!(axis = %binding.axis, "homing");
                binding.stage.home().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::{Connectable, TravelLimits};
    use crate::hardware::mock::SimulatedStage;

    async fn rig() -> (PositionController, Arc<SimulatedStage>, Arc<SimulatedStage>) {
        let xy = Arc::new(SimulatedStage::new("x", LengthUnit::Millimetres));
        let z = Arc::new(
            SimulatedStage::new("z", LengthUnit::Millimetres)
                .with_limits(TravelLimits::new(-6.5, 6.5)),
        );
        xy.connect().await.unwrap();
        z.connect().await.unwrap();
        let controller = PositionController::new()
            .with_axis(Axis::X, xy.clone(), LengthUnit::Millimetres)
            .unwrap()
            .with_axis(Axis::Z, z.clone(), LengthUnit::Millimetres)
            .unwrap();
        (controller, xy, z)
    }

    #[tokio::test]
    async fn test_z_upper_bound_is_inclusive() {
        let (controller, _, z) = rig().await;
        controller
            .set_position(&PositionVector::new(1.0, 0.0, 6.5))
            .await
            .unwrap();
        assert_eq!(z.raw_position().await, 6.5);
    }

    #[tokio::test]
    async fn test_out_of_range_moves_nothing() {
        let (controller, xy, z) = rig().await;
        controller
            .set_position(&PositionVector::new(1.0, 0.0, 6.5))
            .await
            .unwrap();

        let err = controller
            .set_position(&PositionVector::new(2.0, 0.0, 6.50001))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::OutOfRange { .. }));
        // X is moved before Z, so the pre-check must have stopped it too.
        assert_eq!(xy.raw_position().await, 1.0);
        assert_eq!(z.raw_position().await, 6.5);

        let readback = controller.get_position().await.into_vector().unwrap();
        assert_eq!(readback, PositionVector::new(1.0, 0.0, 6.5));
    }

    #[tokio::test]
    async fn test_unbound_axis_must_stay_at_zero() {
        let (controller, _, _) = rig().await;
        let err = controller
            .set_position(&PositionVector::new(0.0, 3.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_readback_degrades_per_axis() {
        let (controller, _, z) = rig().await;
        z.disconnect().await.unwrap();
        let readback = controller.get_position().await;
        assert!(!readback.is_complete());
        assert!(readback.axis(Axis::X).is_some_and(|r| r.is_ok()));
        assert!(readback.axis(Axis::Z).is_some_and(|r| r.is_err()));
        assert_eq!(readback.to_string(), "[0, z=?]");
    }

    #[test]
    fn test_duplicate_axis_rejected() {
        let stage: Arc<dyn Movable> = Arc::new(SimulatedStage::new("x", LengthUnit::Millimetres));
        let result = PositionController::new()
            .with_axis(Axis::X, stage.clone(), LengthUnit::Millimetres)
            .unwrap()
            .with_axis(Axis::X, stage, LengthUnit::Millimetres);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_grid_units_convert_to_stage_units() {
        let xy = Arc::new(SimulatedStage::new("x", LengthUnit::Native).with_native_scale(1000.0));
        xy.connect().await.unwrap();
        let controller = PositionController::new()
            .with_axis(Axis::X, xy.clone(), LengthUnit::Millimetres)
            .unwrap();
        controller.move_axis(Axis::X, 2.5).await.unwrap();
        assert_eq!(xy.raw_position().await, 2500.0);
    }
}
