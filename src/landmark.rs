//! Hand landmark points.
//!
//! # Coordinate spaces
//!
//! * **Detector space**: unit square, origin at the *bottom left*, Y pointing up. This is what a
//!   [`PoseDetector`][crate::detector::PoseDetector] reports ([`LandmarkPoint`]).
//! * **Capture space**: unit square, origin at the *top left* of the captured image, Y pointing
//!   down ([`CapturePoint`]).
//! * **Preview space**: view coordinates in pixels, see [`crate::geometry`].

use nalgebra::Point2;

/// Names for the hand pose landmarks.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: Placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandJoint {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

impl HandJoint {
    /// All joints, in the order hand landmark networks output them.
    pub const ALL: [HandJoint; 21] = {
        use HandJoint::*;
        [
            Wrist,
            ThumbCmc,
            ThumbMcp,
            ThumbIp,
            ThumbTip,
            IndexFingerMcp,
            IndexFingerPip,
            IndexFingerDip,
            IndexFingerTip,
            MiddleFingerMcp,
            MiddleFingerPip,
            MiddleFingerDip,
            MiddleFingerTip,
            RingFingerMcp,
            RingFingerPip,
            RingFingerDip,
            RingFingerTip,
            PinkyMcp,
            PinkyPip,
            PinkyDip,
            PinkyTip,
        ]
    };

    /// Returns the joint at `index` in network output order.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// A named landmark in detector space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkPoint {
    joint: HandJoint,
    location: Point2<f32>,
    confidence: f32,
}

impl LandmarkPoint {
    pub fn new(joint: HandJoint, location: Point2<f32>, confidence: f32) -> Self {
        Self {
            joint,
            location,
            confidence,
        }
    }

    #[inline]
    pub fn joint(&self) -> HandJoint {
        self.joint
    }

    /// Location in the unit square, Y pointing up.
    #[inline]
    pub fn location(&self) -> Point2<f32> {
        self.location
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Converts the point into capture space by flipping it vertically (`y' = 1 - y`).
    pub fn to_capture_space(&self) -> CapturePoint {
        CapturePoint {
            joint: self.joint,
            position: Point2::new(self.location.x, 1.0 - self.location.y),
        }
    }
}

/// A named landmark in capture space, ready to be projected onto the preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturePoint {
    joint: HandJoint,
    position: Point2<f32>,
}

impl CapturePoint {
    pub fn new(joint: HandJoint, position: Point2<f32>) -> Self {
        Self { joint, position }
    }

    #[inline]
    pub fn joint(&self) -> HandJoint {
        self.joint
    }

    /// Position in the unit square, origin at the top left, Y pointing down.
    #[inline]
    pub fn position(&self) -> Point2<f32> {
        self.position
    }
}
