//! Java keytool tool set.
//!
//! Exposes keystore generation, listing and certificate export, plus a raw
//! passthrough for anything else keytool can do.

use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use droidkit_config::KeytoolConfig;
use droidkit_mcp::{
    Arguments, CommandLine, InputSchema, PropertySchema, ToolDescriptor, ToolError, ToolRegistry,
    require_string, scalar_arg, string_list_arg,
};

/// Validity of generated keys when none is given, in days.
const DEFAULT_VALIDITY_DAYS: &str = "365";

#[derive(Debug, Clone)]
struct Keytool {
    binary: String,
    timeout: Duration,
}

impl Keytool {
    fn command(&self) -> CommandLine {
        CommandLine::new(&self.binary).timeout(self.timeout)
    }
}

pub fn registry(config: &KeytoolConfig) -> Result<ToolRegistry> {
    let keytool = Keytool {
        binary: config.binary.clone(),
        timeout: Duration::from_secs(config.timeout_secs),
    };

    let registry = ToolRegistry::builder()
        .register(
            ToolDescriptor::new(
                "generate_keystore",
                "Generate a new keystore with a key pair",
                InputSchema::new()
                    .required("keystore_path", PropertySchema::string("Path to keystore file"))
                    .required("alias", PropertySchema::string("Key alias"))
                    .required(
                        "dname",
                        PropertySchema::string("Distinguished name (e.g., CN=Test, O=Test, C=US)"),
                    )
                    .required("keypass", PropertySchema::string("Key password"))
                    .required("storepass", PropertySchema::string("Keystore password"))
                    .optional(
                        "validity",
                        PropertySchema::string("Validity in days")
                            .with_default(json!(DEFAULT_VALIDITY_DAYS)),
                    ),
            ),
            {
                let keytool = keytool.clone();
                move |args: &Arguments| -> Result<CommandLine, ToolError> {
                    let validity = scalar_arg(args, "validity")
                        .unwrap_or_else(|| DEFAULT_VALIDITY_DAYS.to_string());
                    if !validity.parse::<u32>().is_ok_and(|days| days > 0) {
                        return Err(ToolError::invalid_argument(
                            "validity",
                            "must be a positive number of days",
                        ));
                    }
                    Ok(keytool
                        .command()
                        .arg("-genkeypair")
                        .arg("-alias")
                        .arg(require_string(args, "alias")?)
                        .args(["-keyalg", "RSA", "-keysize", "2048"])
                        .arg("-dname")
                        .arg(require_string(args, "dname")?)
                        .arg("-keypass")
                        .secret_arg(require_string(args, "keypass")?)
                        .arg("-keystore")
                        .arg(require_string(args, "keystore_path")?)
                        .arg("-storepass")
                        .secret_arg(require_string(args, "storepass")?)
                        .arg("-validity")
                        .arg(validity))
                }
            },
        )?
        .register(
            ToolDescriptor::new(
                "list_keystore",
                "List entries in a keystore",
                InputSchema::new()
                    .required("keystore_path", PropertySchema::string("Path to keystore file"))
                    .required("storepass", PropertySchema::string("Keystore password")),
            ),
            {
                let keytool = keytool.clone();
                move |args: &Arguments| -> Result<CommandLine, ToolError> {
                    Ok(keytool
                        .command()
                        .arg("-list")
                        .arg("-keystore")
                        .arg(require_string(args, "keystore_path")?)
                        .arg("-storepass")
                        .secret_arg(require_string(args, "storepass")?))
                }
            },
        )?
        .register(
            ToolDescriptor::new(
                "export_certificate",
                "Export certificate from keystore",
                InputSchema::new()
                    .required("keystore_path", PropertySchema::string("Path to keystore file"))
                    .required("alias", PropertySchema::string("Key alias"))
                    .required("cert_path", PropertySchema::string("Output certificate file path"))
                    .required("storepass", PropertySchema::string("Keystore password")),
            ),
            {
                let keytool = keytool.clone();
                move |args: &Arguments| -> Result<CommandLine, ToolError> {
                    Ok(keytool
                        .command()
                        .arg("-exportcert")
                        .arg("-alias")
                        .arg(require_string(args, "alias")?)
                        .arg("-keystore")
                        .arg(require_string(args, "keystore_path")?)
                        .arg("-storepass")
                        .secret_arg(require_string(args, "storepass")?)
                        .arg("-file")
                        .arg(require_string(args, "cert_path")?))
                }
            },
        )?
        .register(
            ToolDescriptor::new(
                "keytool_command",
                "Execute custom keytool command",
                InputSchema::new().required(
                    "args",
                    PropertySchema::string_array("keytool command arguments"),
                ),
            ),
            move |args: &Arguments| -> Result<CommandLine, ToolError> {
                let extra = string_list_arg(args, "args")?;
                if extra.is_empty() {
                    return Err(ToolError::invalid_argument("args", "must not be empty"));
                }
                Ok(mask_passwords(keytool.command().args(extra)))
            },
        )?
        .build();

    Ok(registry)
}

/// keytool options whose value is a password.
const PASSWORD_OPTIONS: &[&str] = &[
    "-storepass",
    "-keypass",
    "-srcstorepass",
    "-deststorepass",
    "-srckeypass",
    "-destkeypass",
    "-new",
];

/// Mark the value after each password option as secret. `-storepass:env VAR`
/// style modifiers are matched on the option name before the colon.
fn mask_passwords(mut cmd: CommandLine) -> CommandLine {
    let options: Vec<usize> = cmd
        .args
        .iter()
        .enumerate()
        .filter(|(_, arg)| {
            let name = arg.split_once(':').map_or(arg.as_str(), |(name, _)| name);
            PASSWORD_OPTIONS.contains(&name)
        })
        .map(|(index, _)| index + 1)
        .collect();
    for index in options {
        cmd.mark_secret(index);
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(tool: &str, args: serde_json::Value) -> Result<CommandLine, ToolError> {
        let registry = registry(&KeytoolConfig::default()).unwrap();
        let arguments = args.as_object().cloned().unwrap_or_default();
        registry.get(tool).unwrap().handler().command(&arguments)
    }

    #[test]
    fn test_tool_names_and_required_fields() {
        let registry = registry(&KeytoolConfig::default()).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "generate_keystore",
                "list_keystore",
                "export_certificate",
                "keytool_command"
            ]
        );

        let infos = registry.tool_infos();
        assert_eq!(
            infos[0].required_fields(),
            vec!["keystore_path", "alias", "dname", "keypass", "storepass"]
        );
        assert_eq!(infos[3].required_fields(), vec!["args"]);
    }

    #[test]
    fn test_generate_keystore_argv() {
        let cmd = command(
            "generate_keystore",
            json!({
                "keystore_path": "/tmp/release.jks",
                "alias": "release",
                "dname": "CN=Test, O=Test, C=US",
                "keypass": "kp",
                "storepass": "sp"
            }),
        )
        .unwrap();

        assert_eq!(cmd.program, "keytool");
        assert_eq!(
            cmd.args,
            vec![
                "-genkeypair",
                "-alias",
                "release",
                "-keyalg",
                "RSA",
                "-keysize",
                "2048",
                "-dname",
                "CN=Test, O=Test, C=US",
                "-keypass",
                "kp",
                "-keystore",
                "/tmp/release.jks",
                "-storepass",
                "sp",
                "-validity",
                "365"
            ]
        );
        assert_eq!(cmd.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_generate_keystore_rejects_bad_validity() {
        let err = command(
            "generate_keystore",
            json!({
                "keystore_path": "k.jks",
                "alias": "a",
                "dname": "CN=x",
                "keypass": "kp",
                "storepass": "sp",
                "validity": "forever"
            }),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { ref field, .. } if field == "validity"));
    }

    #[test]
    fn test_list_and_export_argv() {
        let list = command(
            "list_keystore",
            json!({"keystore_path": "k.jks", "storepass": "sp"}),
        )
        .unwrap();
        assert_eq!(list.to_string(), "keytool -list -keystore k.jks -storepass sp");

        let export = command(
            "export_certificate",
            json!({"keystore_path": "k.jks", "alias": "a", "cert_path": "a.crt", "storepass": "sp"}),
        )
        .unwrap();
        assert_eq!(
            export.to_string(),
            "keytool -exportcert -alias a -keystore k.jks -storepass sp -file a.crt"
        );
    }

    #[test]
    fn test_passwords_are_redacted() {
        let list = command(
            "list_keystore",
            json!({"keystore_path": "k.jks", "storepass": "hunter2"}),
        )
        .unwrap();
        assert_eq!(
            list.redacted().to_string(),
            "keytool -list -keystore k.jks -storepass ***"
        );

        let raw = command(
            "keytool_command",
            json!({"args": ["-importkeystore", "-srcstorepass", "a", "-deststorepass:env", "PW", "-v", "-keypass"]}),
        )
        .unwrap();
        assert_eq!(
            raw.redacted().to_string(),
            "keytool -importkeystore -srcstorepass *** -deststorepass:env *** -v -keypass"
        );
        assert_eq!(raw.args[2], "a");
    }

    #[test]
    fn test_raw_command_passthrough() {
        let cmd = command("keytool_command", json!({"args": ["-help"]})).unwrap();
        assert_eq!(cmd.args, vec!["-help"]);

        let err = command("keytool_command", json!({"args": []})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { .. }));
    }

    #[test]
    fn test_configured_binary_and_timeout() {
        let config = KeytoolConfig {
            binary: "/opt/jdk/bin/keytool".to_string(),
            timeout_secs: 5,
        };
        let registry = registry(&config).unwrap();
        let cmd = registry
            .get("keytool_command")
            .unwrap()
            .handler()
            .command(&json!({"args": ["-list"]}).as_object().cloned().unwrap())
            .unwrap();
        assert_eq!(cmd.program, "/opt/jdk/bin/keytool");
        assert_eq!(cmd.timeout, Some(Duration::from_secs(5)));
    }
}
