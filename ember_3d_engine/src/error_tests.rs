//! Unit tests for error.rs

use crate::error::{Error, Result};

#[test]
fn test_display_prefixes() {
    let cases = [
        (Error::BackendError("vkQueueSubmit: ERROR_DEVICE_LOST".to_string()), "Backend error: vkQueueSubmit: ERROR_DEVICE_LOST"),
        (Error::OutOfMemory, "Out of GPU memory"),
        (Error::InvalidResource("UAV 3 is not bound".to_string()), "Invalid resource: UAV 3 is not bound"),
        (Error::InitializationFailed("no compute queue".to_string()), "Initialization failed: no compute queue"),
        (Error::ShaderCompilationFailed("Emit.hlsl(12): undeclared identifier".to_string()), "Shader compilation failed: Emit.hlsl(12): undeclared identifier"),
    ];
    for (error, expected) in cases {
        assert_eq!(error.to_string(), expected);
    }
}

#[test]
fn test_boxes_as_std_error() {
    let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(Error::OutOfMemory);
    assert_eq!(boxed.to_string(), "Out of GPU memory");
    assert!(boxed.source().is_none());
}

#[test]
fn test_clone_keeps_message() {
    let original = Error::ShaderCompilationFailed("Sort512.hlsl".to_string());
    match original.clone() {
        Error::ShaderCompilationFailed(message) => assert_eq!(message, "Sort512.hlsl"),
        other => panic!("unexpected clone: {:?}", other),
    }
}

#[test]
fn test_question_mark_stops_at_first_failure() {
    fn validate_stride(stride: u32) -> Result<u32> {
        if stride % 4 != 0 {
            return Err(Error::InvalidResource(format!("stride {} is not a multiple of 4", stride)));
        }
        Ok(stride)
    }

    fn total(strides: &[u32]) -> Result<u32> {
        let mut sum = 0;
        for &stride in strides {
            sum += validate_stride(stride)?;
        }
        Ok(sum)
    }

    assert_eq!(total(&[16, 32]).unwrap(), 48);
    let error = total(&[16, 6, 7]).unwrap_err();
    assert!(error.to_string().ends_with("stride 6 is not a multiple of 4"));
}
