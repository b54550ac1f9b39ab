//! uber-apk-signer tool set.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use droidkit_config::SignerConfig;
use droidkit_mcp::{
    Arguments, CommandLine, InputSchema, PropertySchema, ToolDescriptor, ToolError, ToolRegistry,
    bool_arg, require_string, string_arg,
};

#[derive(Debug, Clone)]
struct Signer {
    java: String,
    jar: PathBuf,
    timeout: Duration,
}

impl Signer {
    /// `java -jar <jar>`, or `Unavailable` when the jar is not on disk.
    fn command(&self) -> Result<CommandLine, ToolError> {
        if !self.jar.is_file() {
            return Err(ToolError::Unavailable(format!(
                "uber-apk-signer jar not found at {}",
                self.jar.display()
            )));
        }
        Ok(CommandLine::new(&self.java)
            .arg("-jar")
            .arg(self.jar.to_string_lossy())
            .timeout(self.timeout))
    }
}

pub fn registry(config: &SignerConfig) -> Result<ToolRegistry> {
    let signer = Signer {
        java: config.java.clone(),
        jar: config.resolved_jar_path(),
        timeout: Duration::from_secs(config.timeout_secs),
    };
    if !signer.jar.is_file() {
        warn!(jar = %signer.jar.display(), "uber-apk-signer jar not found; calls will fail");
    }

    let registry = ToolRegistry::builder()
        .register(
            ToolDescriptor::new(
                "sign_apk",
                "Sign APK file",
                InputSchema::new()
                    .required("apk_path", PropertySchema::string("Path to APK file"))
                    .optional("output_path", PropertySchema::string("Output directory"))
                    .optional("keystore_path", PropertySchema::string("Path to keystore"))
                    .optional("keystore_password", PropertySchema::string("Keystore password"))
                    .optional("key_alias", PropertySchema::string("Key alias"))
                    .optional("key_password", PropertySchema::string("Key password"))
                    .optional(
                        "allow_resign",
                        PropertySchema::boolean("Re-sign an APK that is already signed"),
                    ),
            ),
            {
                let signer = signer.clone();
                move |args: &Arguments| -> Result<CommandLine, ToolError> {
                    let apk = require_string(args, "apk_path")?;
                    let mut cmd = signer.command()?.arg("--apks").arg(apk);
                    for (key, flag, secret) in [
                        ("output_path", "--out", false),
                        ("keystore_path", "--ks", false),
                        ("keystore_password", "--ksPass", true),
                        ("key_alias", "--ksAlias", false),
                        ("key_password", "--ksKeyPass", true),
                    ] {
                        if let Some(value) = string_arg(args, key) {
                            cmd = cmd.arg(flag);
                            cmd = if secret { cmd.secret_arg(value) } else { cmd.arg(value) };
                        }
                    }
                    if bool_arg(args, "allow_resign") {
                        cmd = cmd.arg("--allowResign");
                    }
                    Ok(cmd)
                }
            },
        )?
        .register(
            ToolDescriptor::new(
                "verify_apk",
                "Verify APK signature",
                InputSchema::new().required("apk_path", PropertySchema::string("Path to APK file")),
            ),
            move |args: &Arguments| -> Result<CommandLine, ToolError> {
                let apk = require_string(args, "apk_path")?;
                Ok(signer.command()?.arg("--verify").arg("--apks").arg(apk))
            },
        )?
        .build();

    Ok(registry)
}
