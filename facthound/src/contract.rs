use web3::{
    contract::tokens::Tokenize,
    ethabi::{self, StateMutability, Token},
    types::{Address, Bytes, U256},
};

use crate::{
    error::{Error, Result},
    hasher::ContentHash,
};

pub const FACTHOUND_ABI: &str = r#"[
    {
        "type": "function",
        "name": "createQuestion",
        "inputs": [
            { "name": "questionHash", "type": "bytes32", "internalType": "bytes32" }
        ],
        "outputs": [],
        "stateMutability": "payable"
    },
    {
        "type": "function",
        "name": "createAnswer",
        "inputs": [
            { "name": "questionHash", "type": "bytes32", "internalType": "bytes32" },
            { "name": "answerHash", "type": "bytes32", "internalType": "bytes32" }
        ],
        "outputs": [],
        "stateMutability": "nonpayable"
    },
    {
        "type": "function",
        "name": "selectAnswer",
        "inputs": [
            { "name": "questionHash", "type": "bytes32", "internalType": "bytes32" },
            { "name": "answerHash", "type": "bytes32", "internalType": "bytes32" }
        ],
        "outputs": [],
        "stateMutability": "nonpayable"
    },
    {
        "type": "function",
        "name": "redeemAnswer",
        "inputs": [
            { "name": "questionHash", "type": "bytes32", "internalType": "bytes32" }
        ],
        "outputs": [],
        "stateMutability": "nonpayable"
    }
]"#;

/// Entry points of the FactHound bounty contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BountyFunction {
    CreateQuestion,
    CreateAnswer,
    SelectAnswer,
    RedeemAnswer,
}

impl BountyFunction {
    pub fn name(&self) -> &'static str {
        match self {
            BountyFunction::CreateQuestion => "createQuestion",
            BountyFunction::CreateAnswer => "createAnswer",
            BountyFunction::SelectAnswer => "selectAnswer",
            BountyFunction::RedeemAnswer => "redeemAnswer",
        }
    }
}

impl std::fmt::Display for BountyFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuestionData {
    pub question_hash: ContentHash,
}

impl Tokenize for QuestionData {
    fn into_tokens(self) -> Vec<Token> {
        vec![self.question_hash.into_token()]
    }
}

/// Arguments of `createAnswer` and `selectAnswer`.
#[derive(Debug, Clone, Copy)]
pub struct AnswerData {
    pub question_hash: ContentHash,
    pub answer_hash: ContentHash,
}

impl Tokenize for AnswerData {
    fn into_tokens(self) -> Vec<Token> {
        vec![self.question_hash.into_token(), self.answer_hash.into_token()]
    }
}

#[derive(Debug, Clone)]
pub struct FactHoundContract {
    pub address: Address,
    abi: ethabi::Contract,
}

impl FactHoundContract {
    pub fn new(address: Address) -> Result<Self> {
        let abi = ethabi::Contract::load(FACTHOUND_ABI.as_bytes())?;
        Ok(Self { address, abi })
    }

    /// Same interface deployed at another address.
    pub fn at(&self, address: Address) -> Self {
        Self {
            address,
            abi: self.abi.clone(),
        }
    }

    /// Checks `args` and `value` against the declared interface and returns the calldata.
    pub fn encode_call(&self, function: BountyFunction, args: &[Token], value: Option<U256>) -> Result<Bytes> {
        let func = self.abi.function(function.name())?;

        if func.inputs.len() != args.len() {
            return Err(Error::ArgumentMismatch(format!(
                "{} takes {} arguments, got {}",
                function,
                func.inputs.len(),
                args.len()
            )));
        }
        for (param, arg) in func.inputs.iter().zip(args) {
            if !arg.type_check(&param.kind) {
                return Err(Error::ArgumentMismatch(format!(
                    "{}: argument `{}` expects {}, got {:?}",
                    function, param.name, param.kind, arg
                )));
            }
        }
        if value.map_or(false, |v| !v.is_zero()) && func.state_mutability != StateMutability::Payable {
            return Err(Error::ArgumentMismatch(format!("{} is not payable", function)));
        }

        Ok(Bytes(func.encode_input(args)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> FactHoundContract {
        FactHoundContract::new(Address::repeat_byte(0xfa)).unwrap()
    }

    fn hash(n: u8) -> ContentHash {
        ContentHash::derive(Address::repeat_byte(n), "content")
    }

    #[test]
    fn encodes_create_answer_with_selector() {
        let args = AnswerData {
            question_hash: hash(1),
            answer_hash: hash(2),
        }
        .into_tokens();
        let data = contract()
            .encode_call(BountyFunction::CreateAnswer, &args, None)
            .unwrap();

        // 4-byte selector followed by two 32-byte words, hashes verbatim
        assert_eq!(data.0.len(), 4 + 64);
        assert_eq!(&data.0[4..36], hash(1).as_h256().as_bytes());
        assert_eq!(&data.0[36..68], hash(2).as_h256().as_bytes());
    }

    #[test]
    fn create_question_accepts_value() {
        let args = QuestionData { question_hash: hash(1) }.into_tokens();
        assert!(contract()
            .encode_call(BountyFunction::CreateQuestion, &args, Some(U256::exp10(16)))
            .is_ok());
    }

    #[test]
    fn value_on_nonpayable_is_mismatch() {
        let args = AnswerData {
            question_hash: hash(1),
            answer_hash: hash(2),
        }
        .into_tokens();
        assert!(matches!(
            contract().encode_call(BountyFunction::SelectAnswer, &args, Some(U256::one())),
            Err(Error::ArgumentMismatch(_))
        ));
    }

    #[test]
    fn wrong_count_or_type_is_mismatch() {
        let one = QuestionData { question_hash: hash(1) }.into_tokens();
        assert!(matches!(
            contract().encode_call(BountyFunction::CreateAnswer, &one, None),
            Err(Error::ArgumentMismatch(_))
        ));

        let wrong = vec![Token::Uint(U256::one())];
        assert!(matches!(
            contract().encode_call(BountyFunction::RedeemAnswer, &wrong, None),
            Err(Error::ArgumentMismatch(_))
        ));
    }
}
