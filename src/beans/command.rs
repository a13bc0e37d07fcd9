/// 一条 shell 命令，按参数保存，发送时以空格拼接
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Clone, Default)]
pub struct AdbCommand {
    args: Vec<String>,
}

impl AdbCommand {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            args: vec![program.into()],
        }
    }

    pub fn arg<T: ToString>(mut self, arg: T) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// 以单引号包裹的参数，内部单引号按 sh 规则转义
    pub fn quoted_arg(mut self, arg: &str) -> Self {
        self.args.push(format!("'{}'", arg.replace('\'', r"'\''")));
        self
    }

    pub fn get_command(&self) -> String {
        self.args.join(" ")
    }
}

impl From<&str> for AdbCommand {
    fn from(command: &str) -> Self {
        Self {
            args: command.split_whitespace().map(str::to_string).collect(),
        }
    }
}

impl From<&[&str]> for AdbCommand {
    fn from(args: &[&str]) -> Self {
        Self {
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl<const N: usize> From<[&str; N]> for AdbCommand {
    fn from(args: [&str; N]) -> Self {
        Self::from(&args[..])
    }
}

impl std::fmt::Display for AdbCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.get_command())
    }
}

#[test]
fn test_into() {
    let a = AdbCommand::from("input keyevent 66");
    let b = AdbCommand::from(["input", "keyevent"]).arg(66);
    assert_eq!(a, b);
    assert_eq!(b.get_command(), "input keyevent 66");
}

#[test]
fn test_quoted_arg() {
    let cmd = AdbCommand::from(["input", "text"]).quoted_arg("it's me");
    assert_eq!(cmd.get_command(), r"input text 'it'\''s me'");
}
