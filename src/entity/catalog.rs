//! Static vocabulary: spoken names for packages and the category keywords
//! that map a vague request onto a set of candidates.

pub struct PackageWords {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
}

pub struct CategoryWords {
    pub name: &'static str,
    /// Phrases that name the category; multi-word phrases are matched as a whole.
    pub keywords: &'static [&'static str],
    pub members: &'static [&'static str],
}

pub const PACKAGES: &[PackageWords] = &[
    PackageWords { canonical: "firefox", aliases: &["firefox", "mozilla", "mozilla firefox"] },
    PackageWords { canonical: "firefox-esr", aliases: &["firefox-esr", "firefox esr"] },
    PackageWords { canonical: "chromium", aliases: &["chromium"] },
    PackageWords { canonical: "google-chrome", aliases: &["google-chrome", "chrome", "google chrome"] },
    PackageWords { canonical: "brave", aliases: &["brave", "brave browser"] },
    PackageWords { canonical: "vim", aliases: &["vim", "vi"] },
    PackageWords { canonical: "neovim", aliases: &["neovim", "nvim"] },
    PackageWords { canonical: "emacs", aliases: &["emacs"] },
    PackageWords { canonical: "vscode", aliases: &["vscode", "code", "vs code", "visual studio code"] },
    PackageWords { canonical: "git", aliases: &["git"] },
    PackageWords { canonical: "python3", aliases: &["python3", "python"] },
    PackageWords { canonical: "nodejs", aliases: &["nodejs", "node", "node.js"] },
    PackageWords { canonical: "docker", aliases: &["docker"] },
    PackageWords { canonical: "openssh", aliases: &["openssh", "ssh", "sshd", "ssh server"] },
    PackageWords { canonical: "nginx", aliases: &["nginx"] },
    PackageWords { canonical: "vlc", aliases: &["vlc"] },
    PackageWords { canonical: "mpv", aliases: &["mpv"] },
    PackageWords { canonical: "spotify", aliases: &["spotify"] },
    PackageWords { canonical: "thunderbird", aliases: &["thunderbird"] },
    PackageWords { canonical: "libreoffice", aliases: &["libreoffice", "libre office"] },
    PackageWords { canonical: "gimp", aliases: &["gimp"] },
    PackageWords { canonical: "htop", aliases: &["htop"] },
    PackageWords { canonical: "tmux", aliases: &["tmux"] },
    PackageWords { canonical: "curl", aliases: &["curl"] },
    PackageWords { canonical: "wget", aliases: &["wget"] },
    PackageWords { canonical: "ripgrep", aliases: &["ripgrep", "rg"] },
    PackageWords { canonical: "alacritty", aliases: &["alacritty"] },
    PackageWords { canonical: "kitty", aliases: &["kitty"] },
    PackageWords { canonical: "zsh", aliases: &["zsh"] },
    PackageWords { canonical: "fish", aliases: &["fish"] },
    PackageWords { canonical: "networkmanager", aliases: &["networkmanager", "network manager"] },
    PackageWords { canonical: "systemd", aliases: &["systemd"] },
    PackageWords { canonical: "nix", aliases: &["nix"] },
    PackageWords { canonical: "glibc", aliases: &["glibc"] },
    PackageWords { canonical: "bash", aliases: &["bash"] },
    PackageWords { canonical: "coreutils", aliases: &["coreutils"] },
];

pub const CATEGORIES: &[CategoryWords] = &[
    CategoryWords {
        name: "browser",
        keywords: &["browser", "web browser", "browsers"],
        members: &["firefox", "chromium", "brave"],
    },
    CategoryWords {
        name: "editor",
        keywords: &["editor", "text editor", "code editor", "ide", "editors"],
        members: &["vim", "neovim", "emacs", "vscode"],
    },
    CategoryWords {
        name: "terminal",
        keywords: &["terminal", "terminal emulator"],
        members: &["alacritty", "kitty"],
    },
    CategoryWords {
        name: "media player",
        keywords: &["media player", "video player", "movie player"],
        members: &["vlc", "mpv"],
    },
    CategoryWords {
        name: "music player",
        keywords: &["music player", "music app"],
        members: &["spotify"],
    },
    CategoryWords {
        name: "email client",
        keywords: &["email client", "mail client", "email"],
        members: &["thunderbird"],
    },
    CategoryWords {
        name: "office suite",
        keywords: &["office suite", "office"],
        members: &["libreoffice"],
    },
    CategoryWords {
        name: "shell",
        keywords: &["shell"],
        members: &["zsh", "fish", "bash"],
    },
];
