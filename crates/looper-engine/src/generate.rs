use std::path::PathBuf;

use crate::command::CommandSpec;
use crate::config::ToolConfig;

/// Everything the generator needs for one iteration, snapshotted before launch.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub conditioning: Option<PathBuf>,
    pub height: u32,
    pub width: u32,
    pub seed: i64,
    pub num_frames: u32,
    pub pipeline_config: PathBuf,
    pub output_dir: PathBuf,
}

pub fn build_generation_command(tools: &ToolConfig, request: &GenerationRequest) -> CommandSpec {
    let mut spec = CommandSpec::new(tools.python.as_str())
        .arg(&tools.inference_script)
        .arg("--prompt")
        .arg(request.prompt.as_str());
    if let Some(conditioning) = &request.conditioning {
        spec = spec
            .arg("--conditioning_media_paths")
            .arg(conditioning)
            .arg("--conditioning_start_frames")
            .arg("0");
    }
    spec.arg("--height")
        .arg(request.height.to_string())
        .arg("--width")
        .arg(request.width.to_string())
        .arg("--seed")
        .arg(request.seed.to_string())
        .arg("--num_frames")
        .arg(request.num_frames.to_string())
        .arg("--pipeline_config")
        .arg(&request.pipeline_config)
        .arg("--output_path")
        .arg(&request.output_dir)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{build_generation_command, GenerationRequest};
    use crate::config::ToolConfig;

    fn request(conditioning: Option<&str>) -> GenerationRequest {
        GenerationRequest {
            prompt: "a slow pan over dunes".to_string(),
            conditioning: conditioning.map(PathBuf::from),
            height: 128,
            width: 256,
            seed: 43,
            num_frames: 5,
            pipeline_config: PathBuf::from("dummy.yaml"),
            output_dir: PathBuf::from("/out/frame_001"),
        }
    }

    #[test]
    fn unconditioned_command_matches_generator_contract() {
        let spec = build_generation_command(&ToolConfig::default(), &request(None));
        assert_eq!(spec.program, "python");
        assert_eq!(
            spec.args,
            vec![
                "inference.py",
                "--prompt",
                "a slow pan over dunes",
                "--height",
                "128",
                "--width",
                "256",
                "--seed",
                "43",
                "--num_frames",
                "5",
                "--pipeline_config",
                "dummy.yaml",
                "--output_path",
                "/out/frame_001",
            ]
        );
    }

    #[test]
    fn conditioning_flags_follow_the_prompt() {
        let spec = build_generation_command(
            &ToolConfig::default(),
            &request(Some("/out/frame_000/v_last_frame.png")),
        );
        assert!(spec.args.windows(2).any(|w| {
            w[0] == "--conditioning_media_paths" && w[1] == "/out/frame_000/v_last_frame.png"
        }));
        assert!(spec
            .args
            .windows(2)
            .any(|w| w[0] == "--conditioning_start_frames" && w[1] == "0"));
        let prompt_idx = spec.args.iter().position(|a| a == "--prompt");
        let cond_idx = spec
            .args
            .iter()
            .position(|a| a == "--conditioning_media_paths");
        assert_eq!(prompt_idx.map(|i| i + 2), cond_idx);
    }
}
