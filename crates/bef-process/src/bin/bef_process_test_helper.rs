//! Child process used by the `bef-process` integration tests.
//!
//! Arguments are processed left to right, so output, sleeps and the exit code can be combined.

use std::{
    env,
    io::{self, Write},
    process, thread,
    time::Duration,
};

fn parse_value<T: std::str::FromStr>(value: Option<String>, flag: &str) -> T {
    let value = value.unwrap_or_else(|| {
        eprintln!("missing value for {flag}");
        process::exit(2);
    });
    value.parse().unwrap_or_else(|_| {
        eprintln!("invalid value for {flag}: {value}");
        process::exit(2);
    })
}

fn write_repeated(mut writer: impl Write, mut bytes: usize, fill: u8) -> io::Result<()> {
    let buf = [fill; 8 * 1024];
    while bytes > 0 {
        let n = bytes.min(buf.len());
        writer.write_all(&buf[..n])?;
        bytes -= n;
    }
    writer.flush()
}

fn write_lines(mut writer: impl Write, count: usize, prefix: &str) -> io::Result<()> {
    for idx in 0..count {
        writeln!(writer, "{prefix} line {idx}")?;
    }
    writer.flush()
}

fn spawn_child_sleep(ms: u64) {
    let exe = env::current_exe().unwrap_or_else(|err| {
        eprintln!("failed to resolve current exe: {err}");
        process::exit(2);
    });

    let _child = process::Command::new(exe)
        .args(["--sleep-ms", &ms.to_string()])
        .spawn()
        .unwrap_or_else(|err| {
            eprintln!("failed to spawn child: {err}");
            process::exit(2);
        });
}

fn main() {
    let mut exit_code = 0;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let result = match arg.as_str() {
            "--stdout-bytes" => {
                write_repeated(io::stdout().lock(), parse_value(args.next(), &arg), b'a')
            }
            "--stderr-bytes" => {
                write_repeated(io::stderr().lock(), parse_value(args.next(), &arg), b'b')
            }
            "--stdout-lines" => {
                write_lines(io::stdout().lock(), parse_value(args.next(), &arg), "out")
            }
            "--stderr-lines" => {
                write_lines(io::stderr().lock(), parse_value(args.next(), &arg), "err")
            }
            "--stdout" => {
                let text: String = parse_value(args.next(), &arg);
                writeln!(io::stdout().lock(), "{text}")
            }
            "--stderr" => {
                let text: String = parse_value(args.next(), &arg);
                writeln!(io::stderr().lock(), "{text}")
            }
            "--sleep-ms" => {
                thread::sleep(Duration::from_millis(parse_value(args.next(), &arg)));
                Ok(())
            }
            "--spawn-child-sleep-ms" => {
                spawn_child_sleep(parse_value(args.next(), &arg));
                Ok(())
            }
            "--exit-code" => {
                exit_code = parse_value(args.next(), &arg);
                Ok(())
            }
            other => {
                eprintln!("unknown argument: {other}");
                process::exit(2);
            }
        };
        if let Err(err) = result {
            eprintln!("helper write failed: {err}");
            process::exit(3);
        }
    }
    process::exit(exit_code);
}
